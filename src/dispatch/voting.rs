//! Listener voting engine
//!
//! Install and suspend decisions share one reduction: any affirmative vote
//! wins outright, a negative vote wins over abstention, and a unanimous
//! abstention (including the zero-listener case) defaults to affirmative.
//! A listener that fails is logged, counted as an abstention and never
//! prevents the remaining listeners from being polled.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::breakpoints::Breakpoint;
use crate::common::{Error, Result};
use crate::protocol::{ClassRef, ThreadId};

/// A single listener's vote, reused for install and suspend decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Suspend,
    DontSuspend,
    DontCare,
}

/// Reduced outcome of a vote; `Suspend` doubles as the install decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Suspend,
    Resume,
}

impl Decision {
    /// Affirmative means suspend-the-thread or install-the-breakpoint,
    /// depending on which question was asked
    pub fn is_affirmative(self) -> bool {
        self == Decision::Suspend
    }
}

/// Install/suspend voting listener.
///
/// Polled synchronously by whichever path handles the event, inline or
/// job; implementations that can block are only ever polled off the shared
/// consumer thread.
pub trait VoteListener: Send + Sync {
    /// Vote on installing `breakpoint` into a newly prepared type
    fn install_vote(&self, _breakpoint: &Breakpoint, _class: &ClassRef) -> Result<Vote> {
        Ok(Vote::DontCare)
    }

    /// Vote on suspending `thread` after it hit `breakpoint`
    fn suspend_vote(&self, _breakpoint: &Breakpoint, _thread: ThreadId) -> Result<Vote> {
        Ok(Vote::DontCare)
    }

    /// A condition expression raised an exception inside the target VM;
    /// reported once per failing evaluation
    fn condition_error(&self, _breakpoint: &Breakpoint, _error: &Error) {}
}

/// In-process registry of voting listeners, iterated synchronously
#[derive(Default)]
pub struct VotingEngine {
    listeners: RwLock<Vec<Arc<dyn VoteListener>>>,
}

impl VotingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn VoteListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn VoteListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Poll every listener on installing `breakpoint` into `class`
    pub fn install_decision(&self, breakpoint: &Breakpoint, class: &ClassRef) -> Decision {
        let listeners = self.listeners.read().clone();
        reduce(listeners.iter().map(|l| {
            l.install_vote(breakpoint, class).unwrap_or_else(|e| {
                tracing::warn!(
                    breakpoint = %breakpoint.id(),
                    class = %class.name,
                    error = %e,
                    "Install-vote listener failed; counting as DONT_CARE"
                );
                Vote::DontCare
            })
        }))
    }

    /// Poll every listener on suspending `thread` at `breakpoint`
    pub fn suspend_decision(&self, breakpoint: &Breakpoint, thread: ThreadId) -> Decision {
        let listeners = self.listeners.read().clone();
        reduce(listeners.iter().map(|l| {
            l.suspend_vote(breakpoint, thread).unwrap_or_else(|e| {
                tracing::warn!(
                    breakpoint = %breakpoint.id(),
                    thread = %thread,
                    error = %e,
                    "Suspend-vote listener failed; counting as DONT_CARE"
                );
                Vote::DontCare
            })
        }))
    }

    /// Deliver a condition evaluation error to every listener
    pub fn report_condition_error(&self, breakpoint: &Breakpoint, error: &Error) {
        tracing::warn!(
            breakpoint = %breakpoint.id(),
            error = %error,
            "Condition evaluation raised an exception in the target VM"
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.condition_error(breakpoint, error);
        }
    }
}

/// Reduce a vote set to a decision.
///
/// Precedence: affirmative overrides negative overrides default-affirmative.
pub fn reduce<I>(votes: I) -> Decision
where
    I: IntoIterator<Item = Vote>,
{
    let mut negative = false;
    for vote in votes {
        match vote {
            Vote::Suspend => return Decision::Suspend,
            Vote::DontSuspend => negative = true,
            Vote::DontCare => {}
        }
    }
    if negative {
        Decision::Resume
    } else {
        Decision::Suspend
    }
}
