//! Test support: recording mocks for the transport, evaluator and
//! listener SPI surfaces
//!
//! These stand in for the debuggee VM in unit and integration tests. They
//! record every command and can be scripted with canned outcomes, so tests
//! assert on exact call counts rather than timing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::breakpoints::Breakpoint;
use crate::common::{Error, Result};
use crate::dispatch::{ConditionEvaluator, EventSetListener, Vote, VoteListener};
use crate::hcr::HotCodeReplaceListener;
use crate::protocol::transport::Transport;
use crate::protocol::{BreakpointId, ClassRef, EventSet, RedefinedClass, TargetId, ThreadId};
use crate::target::{MethodRef, StackFrame};

/// Transport double recording every command issued by the engine
#[derive(Default)]
pub struct RecordingTransport {
    resumed: Mutex<Vec<ThreadId>>,
    resume_alls: AtomicUsize,
    redefined: Mutex<Vec<Vec<RedefinedClass>>>,
    redefine_errors: Mutex<VecDeque<Error>>,
    pop_responses: Mutex<HashMap<ThreadId, VecDeque<Vec<StackFrame>>>>,
    pops: Mutex<Vec<(ThreadId, usize)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resumed_threads(&self) -> Vec<ThreadId> {
        self.resumed.lock().clone()
    }

    pub fn resume_all_count(&self) -> usize {
        self.resume_alls.load(Ordering::SeqCst)
    }

    pub fn redefined_batches(&self) -> Vec<Vec<RedefinedClass>> {
        self.redefined.lock().clone()
    }

    pub fn pop_calls(&self) -> Vec<(ThreadId, usize)> {
        self.pops.lock().clone()
    }

    /// Queue an error for the next redefine call
    pub fn fail_next_redefine(&self, error: Error) {
        self.redefine_errors.lock().push_back(error);
    }

    /// Queue the stack returned by the next pop-frames call on `thread`
    pub fn script_pop_response(&self, thread: ThreadId, frames: Vec<StackFrame>) {
        self.pop_responses
            .lock()
            .entry(thread)
            .or_default()
            .push_back(frames);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn resume(&self, thread: ThreadId) -> Result<()> {
        self.resumed.lock().push(thread);
        Ok(())
    }

    async fn resume_all(&self) -> Result<()> {
        self.resume_alls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pop_frames(&self, thread: ThreadId, drop_to: usize) -> Result<Vec<StackFrame>> {
        self.pops.lock().push((thread, drop_to));
        self.pop_responses
            .lock()
            .get_mut(&thread)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| Error::transport_failed("pop_frames", "no scripted response"))
    }

    async fn redefine_classes(&self, classes: &[RedefinedClass]) -> Result<()> {
        if let Some(error) = self.redefine_errors.lock().pop_front() {
            return Err(error);
        }
        self.redefined.lock().push(classes.to_vec());
        Ok(())
    }
}

/// Condition evaluator with canned per-breakpoint outcomes; unscripted
/// breakpoints evaluate to `true`
#[derive(Default)]
pub struct ScriptedEvaluator {
    outcomes: Mutex<HashMap<BreakpointId, VecDeque<Result<bool>>>>,
    evaluations: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, breakpoint: BreakpointId, outcome: Result<bool>) {
        self.outcomes
            .lock()
            .entry(breakpoint)
            .or_default()
            .push_back(outcome);
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConditionEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, breakpoint: &Breakpoint, _thread: ThreadId) -> Result<bool> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .get_mut(&breakpoint.id())
            .and_then(|queue| queue.pop_front());
        outcome.unwrap_or(Ok(true))
    }
}

/// Generic event-set listener counting whole-set deliveries
#[derive(Default)]
pub struct RecordingSetListener {
    sets: Mutex<Vec<EventSet>>,
}

impl RecordingSetListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn sets(&self) -> Vec<EventSet> {
        self.sets.lock().clone()
    }
}

impl EventSetListener for RecordingSetListener {
    fn event_set(&self, _target: TargetId, set: &EventSet) {
        self.sets.lock().push(set.clone());
    }
}

/// Voting listener with fixed per-breakpoint votes; unmapped breakpoints
/// abstain
#[derive(Default)]
pub struct MappedVoteListener {
    suspend_votes: Mutex<HashMap<BreakpointId, Vote>>,
    install_votes: Mutex<HashMap<BreakpointId, Vote>>,
    condition_errors: AtomicUsize,
}

impl MappedVoteListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote_suspend(&self, breakpoint: BreakpointId, vote: Vote) {
        self.suspend_votes.lock().insert(breakpoint, vote);
    }

    pub fn vote_install(&self, breakpoint: BreakpointId, vote: Vote) {
        self.install_votes.lock().insert(breakpoint, vote);
    }

    pub fn condition_error_count(&self) -> usize {
        self.condition_errors.load(Ordering::SeqCst)
    }
}

impl VoteListener for MappedVoteListener {
    fn install_vote(&self, breakpoint: &Breakpoint, _class: &ClassRef) -> Result<Vote> {
        Ok(self
            .install_votes
            .lock()
            .get(&breakpoint.id())
            .copied()
            .unwrap_or(Vote::DontCare))
    }

    fn suspend_vote(&self, breakpoint: &Breakpoint, _thread: ThreadId) -> Result<Vote> {
        Ok(self
            .suspend_votes
            .lock()
            .get(&breakpoint.id())
            .copied()
            .unwrap_or(Vote::DontCare))
    }

    fn condition_error(&self, _breakpoint: &Breakpoint, _error: &Error) {
        self.condition_errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bulk breakpoint listener recording the size of every batch it receives
#[derive(Default)]
pub struct RecordingBatchListener {
    added: Mutex<Vec<usize>>,
    removed: Mutex<Vec<(usize, bool)>>,
    changed: Mutex<Vec<usize>>,
}

impl RecordingBatchListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added_batches(&self) -> Vec<usize> {
        self.added.lock().clone()
    }

    pub fn removed_batches(&self) -> Vec<(usize, bool)> {
        self.removed.lock().clone()
    }

    pub fn changed_batches(&self) -> Vec<usize> {
        self.changed.lock().clone()
    }
}

impl crate::breakpoints::BreakpointBatchListener for RecordingBatchListener {
    fn breakpoints_added(&self, breakpoints: &[Breakpoint]) {
        self.added.lock().push(breakpoints.len());
    }

    fn breakpoints_removed(&self, breakpoints: &[Breakpoint], deleted: bool) {
        self.removed.lock().push((breakpoints.len(), deleted));
    }

    fn breakpoints_changed(&self, breakpoints: &[Breakpoint]) {
        self.changed.lock().push(breakpoints.len());
    }
}

/// Per-item breakpoint listener counting each callback
#[derive(Default)]
pub struct CountingBreakpointListener {
    pub added: AtomicUsize,
    pub removed: AtomicUsize,
    pub deleted: AtomicUsize,
    pub changed: AtomicUsize,
    pub installed: AtomicUsize,
}

impl CountingBreakpointListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl crate::breakpoints::BreakpointListener for CountingBreakpointListener {
    fn breakpoint_added(&self, _breakpoint: &Breakpoint) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn breakpoint_removed(&self, _breakpoint: &Breakpoint, deleted: bool) {
        self.removed.fetch_add(1, Ordering::SeqCst);
        if deleted {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn breakpoint_changed(&self, _breakpoint: &Breakpoint) {
        self.changed.fetch_add(1, Ordering::SeqCst);
    }

    fn breakpoint_installed(&self, _breakpoint: &Breakpoint, _class: &ClassRef) {
        self.installed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hot code replace listener recording every callback
#[derive(Default)]
pub struct RecordingHcrListener {
    succeeded: Mutex<Vec<(TargetId, Vec<ClassRef>)>>,
    failed: Mutex<Vec<(TargetId, String)>>,
    obsolete: Mutex<Vec<(TargetId, Vec<(ClassRef, MethodRef)>)>>,
}

impl RecordingHcrListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any callback fired at all
    pub fn was_notified(&self) -> bool {
        !self.succeeded.lock().is_empty()
            || !self.failed.lock().is_empty()
            || !self.obsolete.lock().is_empty()
    }

    pub fn succeeded_calls(&self) -> Vec<(TargetId, Vec<ClassRef>)> {
        self.succeeded.lock().clone()
    }

    pub fn failed_calls(&self) -> Vec<(TargetId, String)> {
        self.failed.lock().clone()
    }

    pub fn obsolete_calls(&self) -> Vec<(TargetId, Vec<(ClassRef, MethodRef)>)> {
        self.obsolete.lock().clone()
    }
}

impl HotCodeReplaceListener for RecordingHcrListener {
    fn replace_succeeded(&self, target: TargetId, classes: &[ClassRef]) {
        self.succeeded.lock().push((target, classes.to_vec()));
    }

    fn replace_failed(&self, target: TargetId, error: &Error) {
        self.failed.lock().push((target, error.to_string()));
    }

    fn obsolete_methods(&self, target: TargetId, methods: &[(ClassRef, MethodRef)]) {
        self.obsolete.lock().push((target, methods.to_vec()));
    }
}
