//! Event dispatch and breakpoint-voting engine for a JDWP debugger client
//!
//! Consumes event sets from a debuggee VM, correlates them into atomic
//! deliveries, polls registered listeners to a consensus suspend/install
//! decision, and coordinates hot code replace. Byte-level JDWP framing,
//! UI rendering and the resource model are external collaborators.

pub mod breakpoints;
pub mod common;
pub mod dispatch;
pub mod hcr;
pub mod protocol;
pub mod target;
pub mod testing;

// Re-export commonly used types for embedders and tests
pub use breakpoints::{Breakpoint, BreakpointRegistry, BreakpointSpec};
pub use common::{Config, Error, Result};
pub use dispatch::{Decision, EventDispatcher, Vote, VotingEngine};
pub use hcr::HotCodeReplaceCoordinator;
pub use protocol::{Event, EventKind, EventSet, SuspendPolicy};
pub use target::DebugTarget;
