//! Breakpoint lifecycle: model, registry and listener notification

pub mod model;
pub mod registry;

pub use model::{matches_pattern, Breakpoint, BreakpointKind, BreakpointSpec};
pub use registry::{BreakpointBatchListener, BreakpointListener, BreakpointRegistry};
