//! Error types for the dispatch engine
//!
//! Listener and evaluation failures are deliberately non-fatal: the
//! dispatcher logs them and keeps going, so most variants here surface
//! through callbacks rather than aborting a dispatch.

use std::io;
use thiserror::Error;

use crate::protocol::{BreakpointId, ThreadId};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the dispatch engine
#[derive(Error, Debug)]
pub enum Error {
    // === Target Errors ===
    #[error("Target is terminating; no new dispatch may be initiated")]
    TargetTerminating,

    #[error("Target is disconnecting; no new dispatch may be initiated")]
    TargetDisconnecting,

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport command '{command}' failed: {message}")]
    TransportFailed { command: String, message: String },

    // === Breakpoint Errors ===
    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: BreakpointId },

    #[error("Condition evaluation failed for breakpoint {breakpoint}: {message}")]
    ConditionEvaluation {
        breakpoint: BreakpointId,
        message: String,
    },

    // === Thread / Frame Errors ===
    #[error("Thread {0} not found")]
    ThreadNotFound(ThreadId),

    #[error("Frame {index} not found in thread {thread}")]
    FrameNotFound { thread: ThreadId, index: usize },

    // === Hot Code Replace Errors ===
    #[error("Failed to redefine class '{class}': {message}")]
    Redefinition { class: String, message: String },

    #[error("Frame drop in thread {thread} landed in '{actual}', expected '{expected}'")]
    FrameDropMismatch {
        thread: ThreadId,
        expected: String,
        actual: String,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport command failure error
    pub fn transport_failed(command: &str, message: &str) -> Self {
        Self::TransportFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a condition evaluation error
    pub fn condition_evaluation(breakpoint: BreakpointId, message: &str) -> Self {
        Self::ConditionEvaluation {
            breakpoint,
            message: message.to_string(),
        }
    }

    /// Create a redefinition error
    pub fn redefinition(class: &str, message: &str) -> Self {
        Self::Redefinition {
            class: class.to_string(),
            message: message.to_string(),
        }
    }
}
