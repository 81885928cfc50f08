//! JDWP-facing data model
//!
//! Thin mirror of the wire concepts the engine consumes: identifiers,
//! events and the event sets that group them. Byte-level framing lives in
//! the transport, which is an external collaborator (see
//! [`transport::Transport`]).

pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{Error, Result};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// VM-side thread identifier
    ThreadId
);
id_type!(
    /// VM-side reference-type identifier; identifies a concrete loaded
    /// class binding, not a type name
    ClassId
);
id_type!(
    /// VM-side object identifier (used by instance filters)
    ObjectId
);
id_type!(
    /// Identifier of the event request that caused an event
    RequestId
);
id_type!(
    /// Registry-assigned breakpoint identifier
    BreakpointId
);
id_type!(
    /// Debug target identifier
    TargetId
);

/// A concrete class binding loaded into one target's classpath.
///
/// Identity is the VM-assigned [`ClassId`]; `name` and `project` exist for
/// matching and diagnostics. Two same-named classes from unrelated projects
/// have distinct ids and never alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRef {
    pub id: ClassId,
    /// Fully qualified type name, e.g. `com.example.Main$Inner`
    pub name: String,
    /// Owning project on the client side
    pub project: String,
}

impl ClassRef {
    pub fn new(id: ClassId, name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            project: project.into(),
        }
    }
}

/// Source location inside a type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub class_name: String,
    pub line: u32,
}

impl Location {
    pub fn new(class_name: impl Into<String>, line: u32) -> Self {
        Self {
            class_name: class_name.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.line)
    }
}

/// Replacement bytecode for one already-loaded class, as carried by a
/// redefinition notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedefinedClass {
    pub class: ClassRef,
    pub bytecode: Vec<u8>,
}

/// Kind of a VM event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BreakpointHit,
    ClassPrepare,
    ThreadStart,
    ThreadDeath,
    MethodEntry,
    MethodExit,
    ExceptionThrown {
        /// Whether a catch location exists in the debuggee
        caught: bool,
    },
    FieldAccess,
    FieldModification,
    VmDeath,
}

impl EventKind {
    /// True for kinds that are routed through an event request and can
    /// therefore resolve to a breakpoint
    pub fn is_breakpoint_kind(&self) -> bool {
        matches!(
            self,
            EventKind::BreakpointHit
                | EventKind::MethodEntry
                | EventKind::MethodExit
                | EventKind::ExceptionThrown { .. }
                | EventKind::FieldAccess
                | EventKind::FieldModification
        )
    }
}

/// A single VM event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Originating event request; `None` for unsolicited events such as
    /// thread start/death and VM death
    pub request: Option<RequestId>,
    pub thread: ThreadId,
    /// Class the event refers to: the prepared type for class-prepare, the
    /// entered type for method entry/exit
    pub class: Option<ClassRef>,
    /// Receiver object for instance-filterable events
    pub instance: Option<ObjectId>,
}

impl Event {
    pub fn new(kind: EventKind, thread: ThreadId) -> Self {
        Self {
            kind,
            request: None,
            thread,
            class: None,
            instance: None,
        }
    }

    pub fn with_request(mut self, request: RequestId) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_class(mut self, class: ClassRef) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_instance(mut self, instance: ObjectId) -> Self {
        self.instance = Some(instance);
        self
    }
}

/// Suspend policy of an event set, as reported by the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPolicy {
    /// Nothing was suspended; no resume is owed
    None,
    /// The event thread was suspended
    EventThread,
    /// The whole VM was suspended
    All,
}

/// An ordered, non-empty group of events sharing one VM-side occurrence.
///
/// A set is delivered to consumers only as a whole; member events are never
/// visible independently before the set completes. Two breakpoints at the
/// same location hit simultaneously arrive as one set with two events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    events: Vec<Event>,
}

impl EventSet {
    /// Create an event set; fails on an empty event list
    pub fn new(suspend_policy: SuspendPolicy, events: Vec<Event>) -> Result<Self> {
        if events.is_empty() {
            return Err(Error::Protocol("event set must not be empty".to_string()));
        }
        Ok(Self {
            suspend_policy,
            events,
        })
    }

    /// Create a single-event set
    pub fn single(suspend_policy: SuspendPolicy, event: Event) -> Self {
        Self {
            suspend_policy,
            events: vec![event],
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Thread the set's occurrence happened on (events in a set share one
    /// VM-side occurrence)
    pub fn thread(&self) -> ThreadId {
        self.events[0].thread
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_event_set_rejected() {
        let err = EventSet::new(SuspendPolicy::None, vec![]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_set_thread_is_first_event_thread() {
        let set = EventSet::new(
            SuspendPolicy::EventThread,
            vec![
                Event::new(EventKind::BreakpointHit, ThreadId(7)),
                Event::new(EventKind::BreakpointHit, ThreadId(7)),
            ],
        )
        .unwrap();
        assert_eq!(set.thread(), ThreadId(7));
        assert_eq!(set.len(), 2);
    }
}
