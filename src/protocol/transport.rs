//! Transport seam between the engine and the debuggee VM
//!
//! The transport owns byte-level JDWP framing and is an external
//! collaborator; the engine sees it as an async command surface plus an
//! inbound channel of event sets. Exactly one consumer per target drains
//! that channel, in order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;
use crate::protocol::{EventSet, RedefinedClass, ThreadId};
use crate::target::StackFrame;

/// Commands the engine issues back to the debuggee VM.
///
/// Suspension is VM-initiated (via event-set suspend policies); the engine
/// only ever resumes, pops frames and redefines classes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resume a single thread suspended by an event set
    async fn resume(&self, thread: ThreadId) -> Result<()>;

    /// Resume the whole VM after a suspend-all event set
    async fn resume_all(&self) -> Result<()>;

    /// Pop all frames above `drop_to` (inclusive of re-entry) and return the
    /// refreshed call stack, top frame first.
    ///
    /// A real client issues `StackFrame.PopFrames` followed by
    /// `ThreadReference.Frames`; collapsing the pair keeps the seam narrow.
    async fn pop_frames(&self, thread: ThreadId, drop_to: usize) -> Result<Vec<StackFrame>>;

    /// Redefine already-loaded classes (`VirtualMachine.RedefineClasses`)
    async fn redefine_classes(&self, classes: &[RedefinedClass]) -> Result<()>;
}

/// Create the per-target event-set channel.
///
/// The transport's reader task sends; the dispatcher's consumer loop is the
/// single receiver.
pub fn event_channel(capacity: usize) -> (mpsc::Sender<EventSet>, mpsc::Receiver<EventSet>) {
    mpsc::channel(capacity)
}
