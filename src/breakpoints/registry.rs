//! Breakpoint registry and lifecycle notification
//!
//! The registry is the single owner of every [`Breakpoint`]. Lifecycle
//! transitions notify listeners under a strict batching contract: one call
//! per batch to each bulk listener, one call per breakpoint to each
//! single-item listener. Property-only mutations (enable/disable, hit
//! count, filters) fire only the `changed` notification; add, VM-install
//! and delete are the only transitions with their own callbacks.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::protocol::{BreakpointId, ClassId, ClassRef, Location, ObjectId, RequestId};

use super::model::{Breakpoint, BreakpointSpec};

/// Per-item breakpoint lifecycle listener
pub trait BreakpointListener: Send + Sync {
    fn breakpoint_added(&self, _breakpoint: &Breakpoint) {}
    /// `deleted` distinguishes a user delete from a resource-lifecycle
    /// removal such as a project close
    fn breakpoint_removed(&self, _breakpoint: &Breakpoint, _deleted: bool) {}
    fn breakpoint_changed(&self, _breakpoint: &Breakpoint) {}
    /// Fired once per breakpoint/class pair when the breakpoint is
    /// installed into a loaded type
    fn breakpoint_installed(&self, _breakpoint: &Breakpoint, _class: &ClassRef) {}
}

/// Bulk breakpoint lifecycle listener; receives whole batches
pub trait BreakpointBatchListener: Send + Sync {
    fn breakpoints_added(&self, _breakpoints: &[Breakpoint]) {}
    fn breakpoints_removed(&self, _breakpoints: &[Breakpoint], _deleted: bool) {}
    fn breakpoints_changed(&self, _breakpoints: &[Breakpoint]) {}
}

#[derive(Default)]
struct RegistryState {
    breakpoints: HashMap<BreakpointId, Breakpoint>,
    by_request: HashMap<RequestId, BreakpointId>,
    /// Breakpoints stashed while their owning project is closed
    closed_projects: HashMap<String, Vec<Breakpoint>>,
}

/// Owner of all breakpoints for a debug session
pub struct BreakpointRegistry {
    state: RwLock<RegistryState>,
    listeners: RwLock<Vec<Arc<dyn BreakpointListener>>>,
    batch_listeners: RwLock<Vec<Arc<dyn BreakpointBatchListener>>>,
    next_id: AtomicU64,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            listeners: RwLock::new(Vec::new()),
            batch_listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // === Listener registration ===

    pub fn add_listener(&self, listener: Arc<dyn BreakpointListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BreakpointListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_batch_listener(&self, listener: Arc<dyn BreakpointBatchListener>) {
        self.batch_listeners.write().push(listener);
    }

    pub fn remove_batch_listener(&self, listener: &Arc<dyn BreakpointBatchListener>) {
        self.batch_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    // === Creation and deletion ===

    /// Register a batch of breakpoints.
    ///
    /// Each bulk listener receives exactly one call carrying the full
    /// batch; each per-item listener receives one call per breakpoint.
    pub fn add_breakpoints(&self, specs: Vec<BreakpointSpec>) -> Vec<BreakpointId> {
        let breakpoints: Vec<Breakpoint> = specs
            .into_iter()
            .map(|spec| {
                let id = BreakpointId(self.next_id.fetch_add(1, Ordering::SeqCst));
                Breakpoint::from_spec(id, spec)
            })
            .collect();
        let ids: Vec<BreakpointId> = breakpoints.iter().map(|b| b.id()).collect();

        {
            let mut state = self.state.write();
            for bp in &breakpoints {
                state.breakpoints.insert(bp.id(), bp.clone());
            }
        }

        self.notify_added(&breakpoints);
        ids
    }

    /// Remove a batch of breakpoints. `delete` marks a user delete; resource
    /// lifecycle removals (project close) pass `false`.
    pub fn remove_breakpoints(&self, ids: &[BreakpointId], delete: bool) -> Result<()> {
        let removed = self.take_breakpoints(ids)?;
        self.notify_removed(&removed, delete);
        Ok(())
    }

    /// Remove `ids` from the map, all or nothing: an unknown id fails the
    /// whole batch before anything is mutated.
    fn take_breakpoints(&self, ids: &[BreakpointId]) -> Result<Vec<Breakpoint>> {
        let mut state = self.state.write();
        if let Some(id) = ids
            .iter()
            .copied()
            .find(|id| !state.breakpoints.contains_key(id))
        {
            return Err(Error::BreakpointNotFound { id });
        }
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bp) = state.breakpoints.remove(id) {
                removed.push(bp);
            }
        }
        state.by_request.retain(|_, bp| !ids.contains(bp));
        Ok(removed)
    }

    // === Property mutations (fire `changed` only) ===

    pub fn set_enabled(&self, id: BreakpointId, enabled: bool) -> Result<()> {
        self.change(id, |bp| {
            if bp.enabled == enabled {
                return false;
            }
            bp.enabled = enabled;
            true
        })
    }

    pub fn set_hit_count(&self, id: BreakpointId, count: Option<u32>) -> Result<()> {
        self.change(id, |bp| {
            if bp.hit_count == count {
                return false;
            }
            bp.hit_count = count;
            bp.remaining_hits = count;
            true
        })
    }

    pub fn set_filters(
        &self,
        id: BreakpointId,
        patterns: Vec<String>,
        inclusive: bool,
    ) -> Result<()> {
        self.change(id, |bp| {
            bp.class_filters = patterns.clone();
            bp.filters_inclusive = inclusive;
            true
        })
    }

    pub fn add_instance_filter(&self, id: BreakpointId, instance: ObjectId) -> Result<()> {
        self.change(id, |bp| {
            if bp.instance_filter == Some(instance) {
                return false;
            }
            bp.instance_filter = Some(instance);
            true
        })
    }

    /// Apply `mutate` to the breakpoint; fire `changed` when it reports a
    /// real change. Never fires added/installed/removed.
    fn change<F>(&self, id: BreakpointId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Breakpoint) -> bool,
    {
        let snapshot = {
            let mut state = self.state.write();
            let bp = state
                .breakpoints
                .get_mut(&id)
                .ok_or(Error::BreakpointNotFound { id })?;
            if !mutate(bp) {
                return Ok(());
            }
            bp.clone()
        };
        self.notify_changed(&snapshot);
        Ok(())
    }

    // === VM install ===

    /// Record that the breakpoint was installed into `class`. Fires the
    /// installed notification once per breakpoint/class transition;
    /// re-marking is a no-op.
    pub fn mark_installed(&self, id: BreakpointId, class: &ClassRef) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write();
            let bp = state
                .breakpoints
                .get_mut(&id)
                .ok_or(Error::BreakpointNotFound { id })?;
            if !bp.installed_types.insert(class.id) {
                return Ok(());
            }
            bp.clone()
        };
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.breakpoint_installed(&snapshot, class);
        }
        Ok(())
    }

    /// Bind a VM event request to its breakpoint so hit events can be routed
    pub fn bind_request(&self, request: RequestId, id: BreakpointId) -> Result<()> {
        let mut state = self.state.write();
        if !state.breakpoints.contains_key(&id) {
            return Err(Error::BreakpointNotFound { id });
        }
        state.by_request.insert(request, id);
        Ok(())
    }

    // === Hit filtering ===

    /// Apply the enabled flag, instance filter and hit-count countdown to a
    /// hit. Returns a snapshot when the hit should proceed to voting,
    /// `None` when the thread must resume without polling listeners.
    pub fn filter_hit(&self, id: BreakpointId, instance: Option<ObjectId>) -> Option<Breakpoint> {
        let mut state = self.state.write();
        let bp = state.breakpoints.get_mut(&id)?;
        if !bp.enabled || !bp.passes_instance_filter(instance) {
            return None;
        }
        if let Some(remaining) = bp.remaining_hits {
            if remaining > 1 {
                bp.remaining_hits = Some(remaining - 1);
                return None;
            }
            // Countdown reached; rearm for the next cycle
            bp.remaining_hits = bp.hit_count;
        }
        Some(bp.clone())
    }

    // === Lookup ===

    pub fn breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.state.read().breakpoints.get(&id).cloned()
    }

    pub fn breakpoint_for_request(&self, request: RequestId) -> Option<Breakpoint> {
        let state = self.state.read();
        let id = state.by_request.get(&request)?;
        state.breakpoints.get(id).cloned()
    }

    /// Distinct registry entries may share a source location
    pub fn breakpoints_at(&self, location: &Location) -> Vec<Breakpoint> {
        self.state
            .read()
            .breakpoints
            .values()
            .filter(|bp| bp.location().as_ref() == Some(location))
            .cloned()
            .collect()
    }

    /// Enabled breakpoints that apply to a newly prepared class
    pub fn matching_prepared_class(&self, class: &ClassRef) -> Vec<Breakpoint> {
        let mut matches: Vec<Breakpoint> = self
            .state
            .read()
            .breakpoints
            .values()
            .filter(|bp| bp.enabled && bp.applies_to_class(class))
            .cloned()
            .collect();
        matches.sort_by_key(|bp| bp.id());
        matches
    }

    /// Breakpoints installed into a concrete class binding
    pub fn breakpoints_installed_in(&self, class: ClassId) -> Vec<Breakpoint> {
        self.state
            .read()
            .breakpoints
            .values()
            .filter(|bp| bp.installed_types.contains(&class))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().breakpoints.is_empty()
    }

    // === Resource lifecycle ===

    /// Remove every breakpoint owned by `project` as a resource-lifecycle
    /// side effect. The batching contract is identical to an explicit
    /// [`Self::remove_breakpoints`] call: one bulk notification for the
    /// whole batch, not delete-marked. The breakpoints are retained for
    /// [`Self::open_project`].
    pub fn close_project(&self, project: &str) {
        let removed = {
            let mut state = self.state.write();
            let ids: Vec<BreakpointId> = state
                .breakpoints
                .values()
                .filter(|bp| bp.project == project)
                .map(|bp| bp.id())
                .collect();
            let mut removed = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(bp) = state.breakpoints.remove(id) {
                    removed.push(bp);
                }
            }
            removed.sort_by_key(|bp| bp.id());
            state.by_request.retain(|_, bp| !ids.contains(bp));
            state
                .closed_projects
                .insert(project.to_string(), removed.clone());
            removed
        };
        if !removed.is_empty() {
            self.notify_removed(&removed, false);
        }
    }

    /// Re-add the breakpoints stashed by [`Self::close_project`] in one
    /// batch. Identity is preserved; installed types are not (the VM must
    /// re-install once classes prepare again).
    pub fn open_project(&self, project: &str) {
        let reopened = {
            let mut state = self.state.write();
            let Some(mut stashed) = state.closed_projects.remove(project) else {
                return;
            };
            for bp in stashed.iter_mut() {
                bp.installed_types.clear();
                bp.remaining_hits = bp.hit_count;
            }
            for bp in &stashed {
                state.breakpoints.insert(bp.id(), bp.clone());
            }
            stashed
        };
        if !reopened.is_empty() {
            self.notify_added(&reopened);
        }
    }

    // === Notification ===
    //
    // Callbacks run on snapshots of the listener vectors, never under the
    // registration lock, so a listener may register or deregister listeners
    // from inside its callback.

    fn notify_added(&self, breakpoints: &[Breakpoint]) {
        let batch_listeners = self.batch_listeners.read().clone();
        for listener in batch_listeners {
            listener.breakpoints_added(breakpoints);
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            for bp in breakpoints {
                listener.breakpoint_added(bp);
            }
        }
    }

    fn notify_removed(&self, breakpoints: &[Breakpoint], deleted: bool) {
        let batch_listeners = self.batch_listeners.read().clone();
        for listener in batch_listeners {
            listener.breakpoints_removed(breakpoints, deleted);
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            for bp in breakpoints {
                listener.breakpoint_removed(bp, deleted);
            }
        }
    }

    fn notify_changed(&self, breakpoint: &Breakpoint) {
        let batch = std::slice::from_ref(breakpoint);
        let batch_listeners = self.batch_listeners.read().clone();
        for listener in batch_listeners {
            listener.breakpoints_changed(batch);
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.breakpoint_changed(breakpoint);
        }
    }
}
