//! Debug target state
//!
//! One [`DebugTarget`] mirrors the client-visible state of a single
//! debuggee VM: its threads and their call stacks, the concrete class
//! bindings loaded into its classpath, and the availability guards that
//! gate dispatch during shutdown.
//!
//! Suspension flags are committed by the dispatcher only; readers observe
//! a decision strictly after it has been committed (no half-applied
//! state).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::common::{Error, Result};
use crate::protocol::{ClassId, ClassRef, Location, TargetId, ThreadId};

/// A method reference inside a loaded class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub name: String,
    pub is_constructor: bool,
    /// First executable line of the method body. After a frame drop,
    /// execution resumes here; constructors restart at the beginning of the
    /// constructor body, not mid-body.
    pub entry_line: u32,
}

impl MethodRef {
    pub fn new(name: impl Into<String>, entry_line: u32) -> Self {
        Self {
            name: name.into(),
            is_constructor: false,
            entry_line,
        }
    }

    pub fn constructor(entry_line: u32) -> Self {
        Self {
            name: "<init>".to_string(),
            is_constructor: true,
            entry_line,
        }
    }
}

/// One frame of a thread's call stack (index 0 is the top)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class: ClassRef,
    pub method: MethodRef,
    pub location: Location,
    /// Set once the frame's method was invalidated by a class redefinition
    pub is_obsolete: bool,
}

impl StackFrame {
    pub fn new(class: ClassRef, method: MethodRef, line: u32) -> Self {
        let location = Location::new(class.name.clone(), line);
        Self {
            class,
            method,
            location,
            is_obsolete: false,
        }
    }
}

/// Availability of a target for new dispatch.
///
/// `Terminating` and `Disconnecting` are mutually exclusive guards; at most
/// one holds at any instant, and no new dispatch may be initiated while
/// either holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    #[default]
    Available,
    Terminating,
    Disconnecting,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Terminating => write!(f, "terminating"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

#[derive(Debug, Clone)]
struct ThreadState {
    name: String,
    suspended: bool,
    frames: Vec<StackFrame>,
}

#[derive(Default)]
struct TargetState {
    threads: HashMap<ThreadId, ThreadState>,
    loaded_classes: HashMap<ClassId, ClassRef>,
    availability: Availability,
}

/// Client-side mirror of one debuggee VM
pub struct DebugTarget {
    id: TargetId,
    name: String,
    state: RwLock<TargetState>,
}

impl DebugTarget {
    pub fn new(id: TargetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: RwLock::new(TargetState::default()),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // === Threads ===

    pub fn add_thread(&self, thread: ThreadId, name: impl Into<String>) {
        let mut state = self.state.write();
        state.threads.insert(
            thread,
            ThreadState {
                name: name.into(),
                suspended: false,
                frames: Vec::new(),
            },
        );
    }

    /// Register `thread` if the VM never announced it (attach-time threads
    /// predate thread-start events)
    pub fn ensure_thread(&self, thread: ThreadId) {
        let mut state = self.state.write();
        state.threads.entry(thread).or_insert_with(|| ThreadState {
            name: format!("thread-{}", thread),
            suspended: false,
            frames: Vec::new(),
        });
    }

    pub fn remove_thread(&self, thread: ThreadId) {
        self.state.write().threads.remove(&thread);
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        self.state.read().threads.get(&thread).map(|t| t.name.clone())
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.state.read().threads.keys().copied().collect()
    }

    /// Committed suspension state; `false` for unknown threads
    pub fn is_thread_suspended(&self, thread: ThreadId) -> bool {
        self.state
            .read()
            .threads
            .get(&thread)
            .map(|t| t.suspended)
            .unwrap_or(false)
    }

    /// Commit a suspend decision for `thread`
    pub fn mark_thread_suspended(&self, thread: ThreadId) {
        if let Some(t) = self.state.write().threads.get_mut(&thread) {
            t.suspended = true;
        }
    }

    /// Commit a resume decision for `thread`
    pub fn mark_thread_resumed(&self, thread: ThreadId) {
        if let Some(t) = self.state.write().threads.get_mut(&thread) {
            t.suspended = false;
        }
    }

    // === Frames ===

    pub fn set_frames(&self, thread: ThreadId, frames: Vec<StackFrame>) -> Result<()> {
        let mut state = self.state.write();
        let t = state
            .threads
            .get_mut(&thread)
            .ok_or(Error::ThreadNotFound(thread))?;
        t.frames = frames;
        Ok(())
    }

    pub fn frames(&self, thread: ThreadId) -> Result<Vec<StackFrame>> {
        self.state
            .read()
            .threads
            .get(&thread)
            .map(|t| t.frames.clone())
            .ok_or(Error::ThreadNotFound(thread))
    }

    /// Mark frames referencing any of `classes` as obsolete and return the
    /// threads that were affected while suspended
    pub fn mark_obsolete_frames(&self, classes: &[ClassId]) -> Vec<ThreadId> {
        let mut state = self.state.write();
        let mut affected = Vec::new();
        for (id, t) in state.threads.iter_mut() {
            if !t.suspended {
                continue;
            }
            let mut touched = false;
            for frame in t.frames.iter_mut() {
                if classes.contains(&frame.class.id) {
                    frame.is_obsolete = true;
                    touched = true;
                }
            }
            if touched {
                affected.push(*id);
            }
        }
        affected.sort();
        affected
    }

    // === Classes ===

    pub fn class_loaded(&self, class: ClassRef) {
        self.state.write().loaded_classes.insert(class.id, class);
    }

    pub fn class_unloaded(&self, class: ClassId) {
        self.state.write().loaded_classes.remove(&class);
    }

    /// Redefinition eligibility is keyed by the concrete binding loaded into
    /// this target's classpath, never by type name alone
    pub fn is_class_loaded(&self, class: ClassId) -> bool {
        self.state.read().loaded_classes.contains_key(&class)
    }

    pub fn loaded_class(&self, class: ClassId) -> Option<ClassRef> {
        self.state.read().loaded_classes.get(&class).cloned()
    }

    // === Availability ===

    pub fn availability(&self) -> Availability {
        self.state.read().availability
    }

    pub fn is_available(&self) -> bool {
        self.availability() == Availability::Available
    }

    /// Flip the terminating guard. Fails if the disconnecting guard already
    /// holds; the two are mutually exclusive.
    pub fn begin_terminate(&self) -> Result<()> {
        let mut state = self.state.write();
        match state.availability {
            Availability::Disconnecting => Err(Error::TargetDisconnecting),
            _ => {
                state.availability = Availability::Terminating;
                Ok(())
            }
        }
    }

    /// Flip the disconnecting guard. Fails if the terminating guard already
    /// holds.
    pub fn begin_disconnect(&self) -> Result<()> {
        let mut state = self.state.write();
        match state.availability {
            Availability::Terminating => Err(Error::TargetTerminating),
            _ => {
                state.availability = Availability::Disconnecting;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for DebugTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("availability", &self.availability())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DebugTarget {
        DebugTarget::new(TargetId(1), "test-vm")
    }

    #[test]
    fn test_suspend_commit_visibility() {
        let t = target();
        t.add_thread(ThreadId(1), "main");
        assert!(!t.is_thread_suspended(ThreadId(1)));
        t.mark_thread_suspended(ThreadId(1));
        assert!(t.is_thread_suspended(ThreadId(1)));
        t.mark_thread_resumed(ThreadId(1));
        assert!(!t.is_thread_suspended(ThreadId(1)));
    }

    #[test]
    fn test_terminate_and_disconnect_are_mutually_exclusive() {
        let t = target();
        t.begin_terminate().unwrap();
        assert_eq!(t.availability(), Availability::Terminating);
        assert!(matches!(t.begin_disconnect(), Err(Error::TargetTerminating)));

        let t = target();
        t.begin_disconnect().unwrap();
        assert!(matches!(t.begin_terminate(), Err(Error::TargetDisconnecting)));
        assert_eq!(t.availability(), Availability::Disconnecting);
    }

    #[test]
    fn test_obsolete_frames_only_marked_on_suspended_threads() {
        let t = target();
        let class = ClassRef::new(ClassId(10), "com.example.A", "proj");
        t.add_thread(ThreadId(1), "main");
        t.add_thread(ThreadId(2), "worker");
        let frame = StackFrame::new(class.clone(), MethodRef::new("run", 5), 9);
        t.set_frames(ThreadId(1), vec![frame.clone()]).unwrap();
        t.set_frames(ThreadId(2), vec![frame]).unwrap();
        t.mark_thread_suspended(ThreadId(1));

        let affected = t.mark_obsolete_frames(&[ClassId(10)]);
        assert_eq!(affected, vec![ThreadId(1)]);
        assert!(t.frames(ThreadId(1)).unwrap()[0].is_obsolete);
        assert!(!t.frames(ThreadId(2)).unwrap()[0].is_obsolete);
    }
}
