//! Hot code replace coordination
//!
//! Reacts to class-redefinition notifications: redefines the bytecode in
//! the debuggee, drops obsolete frames so execution re-enters the replaced
//! methods at their entry, and notifies listeners. Notification precedence
//! is mutually exclusive: a target-specific listener pre-empts the general
//! ones, never both. This is deliberately a different consensus shape from
//! breakpoint voting, which aggregates every listener.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::breakpoints::BreakpointRegistry;
use crate::common::{Error, HotCodeReplaceConfig, Result};
use crate::protocol::transport::Transport;
use crate::protocol::{ClassId, ClassRef, RedefinedClass, TargetId, ThreadId};
use crate::target::{DebugTarget, MethodRef, StackFrame};

/// Scope of a hot code replace listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerScope {
    /// Receives notifications for any target without a specific listener
    Global,
    /// Receives notifications for one target, pre-empting global listeners
    Target(TargetId),
}

/// Hot code replace listener SPI
pub trait HotCodeReplaceListener: Send + Sync {
    fn replace_succeeded(&self, _target: TargetId, _classes: &[ClassRef]) {}
    /// Redefinition failed; debugging continues, nothing propagates to the
    /// caller that triggered the build
    fn replace_failed(&self, _target: TargetId, _error: &Error) {}
    fn obsolete_methods(&self, _target: TargetId, _methods: &[(ClassRef, MethodRef)]) {}
}

/// A class-redefinition notification from the build/compile path
#[derive(Debug, Clone)]
pub struct RedefinitionNotification {
    pub classes: Vec<RedefinedClass>,
}

/// A synthesized drop-to-frame: pop everything above `drop_to` and
/// re-enter `reenter` at its entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDrop {
    pub thread: ThreadId,
    pub drop_to: usize,
    pub reenter: MethodRef,
}

/// Coordinates hot code replace for one debug target
pub struct HotCodeReplaceCoordinator {
    config: HotCodeReplaceConfig,
    target: Arc<DebugTarget>,
    transport: Arc<dyn Transport>,
    registry: Arc<BreakpointRegistry>,
    listeners: RwLock<Vec<(Arc<dyn HotCodeReplaceListener>, ListenerScope)>>,
}

impl HotCodeReplaceCoordinator {
    pub fn new(
        config: HotCodeReplaceConfig,
        target: Arc<DebugTarget>,
        transport: Arc<dyn Transport>,
        registry: Arc<BreakpointRegistry>,
    ) -> Self {
        Self {
            config,
            target,
            transport,
            registry,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn HotCodeReplaceListener>, scope: ListenerScope) {
        self.listeners.write().push((listener, scope));
    }

    pub fn remove_listener(&self, listener: &Arc<dyn HotCodeReplaceListener>) {
        self.listeners
            .write()
            .retain(|(l, _)| !Arc::ptr_eq(l, listener));
    }

    /// Handle a redefinition notification.
    ///
    /// Eligibility is keyed by the concrete class binding loaded into this
    /// target's classpath: a same-named type edited in an unrelated project
    /// triggers no callback and no frame drop here. Redefinition failures
    /// surface through the failure callback, never as an error to the
    /// caller.
    pub async fn classes_redefined(&self, notification: RedefinitionNotification) -> Result<()> {
        let eligible: Vec<RedefinedClass> = notification
            .classes
            .into_iter()
            .filter(|c| self.target.is_class_loaded(c.class.id))
            .collect();

        if eligible.is_empty() {
            tracing::debug!(
                target_id = %self.target.id(),
                "No redefined class is loaded in this target; ignoring"
            );
            return Ok(());
        }

        let class_refs: Vec<ClassRef> = eligible.iter().map(|c| c.class.clone()).collect();
        let class_ids: Vec<ClassId> = class_refs.iter().map(|c| c.id).collect();

        if let Err(e) = self.transport.redefine_classes(&eligible).await {
            tracing::warn!(target_id = %self.target.id(), error = %e, "Redefinition failed");
            self.notify(|l| l.replace_failed(self.target.id(), &e));
            return Ok(());
        }

        // Breakpoints installed into the redefined bindings keep their VM
        // requests; log them for diagnosis of stale-location reports.
        let installed: usize = class_ids
            .iter()
            .map(|id| self.registry.breakpoints_installed_in(*id).len())
            .sum();
        tracing::debug!(
            target_id = %self.target.id(),
            classes = class_refs.len(),
            breakpoints = installed,
            "Classes redefined"
        );

        let mut obsolete: Vec<(ClassRef, MethodRef)> = Vec::new();
        if self.config.drop_frames {
            let affected = self.target.mark_obsolete_frames(&class_ids);
            for thread in affected {
                match self.drop_obsolete_frames(thread).await {
                    Ok(mut methods) => obsolete.append(&mut methods),
                    Err(e) => {
                        tracing::warn!(
                            target_id = %self.target.id(),
                            thread = %thread,
                            error = %e,
                            "Frame drop failed after redefinition"
                        );
                    }
                }
            }
        }

        if !obsolete.is_empty() {
            self.notify(|l| l.obsolete_methods(self.target.id(), &obsolete));
        }
        self.notify(|l| l.replace_succeeded(self.target.id(), &class_refs));
        Ok(())
    }

    /// Drop to the deepest obsolete frame of `thread` and verify execution
    /// re-entered the replaced method at its entry. Returns the obsolete
    /// methods of the dropped frames.
    async fn drop_obsolete_frames(&self, thread: ThreadId) -> Result<Vec<(ClassRef, MethodRef)>> {
        let frames = self.target.frames(thread)?;
        let Some(drop) = compute_frame_drop(thread, &frames) else {
            return Ok(Vec::new());
        };
        let obsolete: Vec<(ClassRef, MethodRef)> = frames
            .iter()
            .take(drop.drop_to + 1)
            .filter(|f| f.is_obsolete)
            .map(|f| (f.class.clone(), f.method.clone()))
            .collect();

        let refreshed = match self.apply_frame_drop(&drop).await {
            Ok(frames) => frames,
            // Some VMs report a stale stack immediately after
            // RedefineClasses; one silent retry is the known workaround.
            Err(Error::FrameDropMismatch { .. }) => {
                tracing::debug!(thread = %thread, "Frame drop mismatch; retrying once");
                self.apply_frame_drop(&drop).await?
            }
            Err(e) => return Err(e),
        };
        self.target.set_frames(thread, refreshed)?;
        Ok(obsolete)
    }

    async fn apply_frame_drop(&self, drop: &FrameDrop) -> Result<Vec<StackFrame>> {
        let refreshed = self.transport.pop_frames(drop.thread, drop.drop_to).await?;
        let top = refreshed.first().ok_or(Error::FrameNotFound {
            thread: drop.thread,
            index: 0,
        })?;
        if top.method.name != drop.reenter.name || top.location.line != drop.reenter.entry_line {
            return Err(Error::FrameDropMismatch {
                thread: drop.thread,
                expected: format!("{}:{}", drop.reenter.name, drop.reenter.entry_line),
                actual: format!("{}:{}", top.method.name, top.location.line),
            });
        }
        Ok(refreshed)
    }

    /// Notify listeners under the specific-overrides-general rule.
    ///
    /// Callbacks run on a snapshot, not under the registration lock, so a
    /// listener may register or deregister listeners from its callback.
    fn notify<F>(&self, f: F)
    where
        F: Fn(&dyn HotCodeReplaceListener),
    {
        let listeners = self.listeners.read().clone();
        let specific: Vec<_> = listeners
            .iter()
            .filter(|(_, scope)| *scope == ListenerScope::Target(self.target.id()))
            .collect();
        if !specific.is_empty() {
            for (listener, _) in specific {
                f(listener.as_ref());
            }
            return;
        }
        for (listener, scope) in listeners.iter() {
            if *scope == ListenerScope::Global {
                f(listener.as_ref());
            }
        }
    }
}

/// Find the deepest obsolete frame (furthest from the top) and synthesize
/// the drop that re-enters its method at the entry. Constructors re-enter
/// at the beginning of the constructor body.
pub fn compute_frame_drop(thread: ThreadId, frames: &[StackFrame]) -> Option<FrameDrop> {
    let (index, frame) = frames
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_obsolete)
        .next_back()?;
    Some(FrameDrop {
        thread,
        drop_to: index,
        reenter: frame.method.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClassId;

    fn frame(name: &str, obsolete: bool) -> StackFrame {
        let class = ClassRef::new(ClassId(1), "com.example.A", "p");
        let mut f = StackFrame::new(class, MethodRef::new(name, 10), 20);
        f.is_obsolete = obsolete;
        f
    }

    #[test]
    fn test_drop_targets_deepest_obsolete_frame() {
        let frames = vec![
            frame("inner", true),
            frame("middle", true),
            frame("outer", false),
        ];
        let drop = compute_frame_drop(ThreadId(1), &frames).unwrap();
        assert_eq!(drop.drop_to, 1);
        assert_eq!(drop.reenter.name, "middle");
    }

    #[test]
    fn test_no_drop_without_obsolete_frames() {
        let frames = vec![frame("run", false), frame("main", false)];
        assert!(compute_frame_drop(ThreadId(1), &frames).is_none());
    }

    #[test]
    fn test_constructor_reenters_at_body_start() {
        let class = ClassRef::new(ClassId(1), "com.example.A", "p");
        let mut ctor = StackFrame::new(class, MethodRef::constructor(7), 12);
        ctor.is_obsolete = true;
        let drop = compute_frame_drop(ThreadId(1), &[ctor]).unwrap();
        assert!(drop.reenter.is_constructor);
        assert_eq!(drop.reenter.entry_line, 7);
    }
}
