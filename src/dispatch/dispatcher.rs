//! Event dispatcher
//!
//! Consumes the transport's event-set stream (one consumer per target, in
//! order), resolves each event to its breakpoint, and decides suspend vs.
//! resume. Unconditional breakpoints vote inline on the consumer path;
//! conditional breakpoints vote inside a dispatch job so a slow or
//! side-effecting condition cannot stall delivery of unrelated events.
//! Bursts of trivial notifications allocate no jobs at all.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use async_trait::async_trait;

use crate::breakpoints::{Breakpoint, BreakpointKind, BreakpointRegistry};
use crate::common::{DispatchConfig, Result};
use crate::protocol::transport::Transport;
use crate::protocol::{ClassRef, Event, EventKind, EventSet, SuspendPolicy, TargetId, ThreadId};
use crate::target::DebugTarget;

use super::job::{JobKey, JobPhase, JobTracker};
use super::voting::{Decision, VotingEngine};

/// Generic consumer of whole event sets (UI, console, loggers).
///
/// Sets are delivered exactly once each, before any voting commits; member
/// events are never visible independently.
pub trait EventSetListener: Send + Sync {
    fn event_set(&self, target: TargetId, set: &EventSet);
}

/// In-VM evaluation of a conditional breakpoint's expression
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(&self, breakpoint: &Breakpoint, thread: ThreadId) -> Result<bool>;
}

/// Collects the decisions owed for one event set and commits once all are
/// in. Thread suspension state is flipped before any resume command is
/// issued, so readers only ever observe the committed decision.
struct SetCommit {
    target: Arc<DebugTarget>,
    transport: Arc<dyn Transport>,
    thread: ThreadId,
    policy: SuspendPolicy,
    remaining: AtomicUsize,
    suspend: AtomicBool,
}

impl SetCommit {
    fn new(
        target: Arc<DebugTarget>,
        transport: Arc<dyn Transport>,
        thread: ThreadId,
        policy: SuspendPolicy,
        contributors: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            transport,
            thread,
            policy,
            remaining: AtomicUsize::new(contributors),
            suspend: AtomicBool::new(false),
        })
    }

    async fn report(&self, decision: Decision) {
        if decision.is_affirmative() {
            self.suspend.store(true, Ordering::SeqCst);
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.apply().await;
        }
    }

    async fn apply(&self) {
        if self.policy == SuspendPolicy::None {
            if self.suspend.load(Ordering::SeqCst) {
                tracing::warn!(
                    thread = %self.thread,
                    "Suspend decision on a non-suspending event set; nothing to hold"
                );
            }
            return;
        }
        self.target.ensure_thread(self.thread);
        if self.suspend.load(Ordering::SeqCst) {
            self.target.mark_thread_suspended(self.thread);
            tracing::debug!(thread = %self.thread, "Committed: thread stays suspended");
            return;
        }
        self.target.mark_thread_resumed(self.thread);
        let result = match self.policy {
            SuspendPolicy::EventThread => self.transport.resume(self.thread).await,
            SuspendPolicy::All => self.transport.resume_all().await,
            SuspendPolicy::None => unreachable!(),
        };
        if let Err(e) = result {
            tracing::warn!(thread = %self.thread, error = %e, "Resume command failed");
        }
    }
}

/// Work owed for one event set beyond generic delivery
enum Work {
    /// Decision already reached inline on the consumer path
    Inline(Decision),
    /// Install decision deferred to the class-prepare phase job
    InstallJob { breakpoint: Breakpoint, class: ClassRef },
    /// Condition evaluation plus suspend vote deferred to the hit job
    HitJob { breakpoint: Breakpoint },
}

/// Per-target event dispatcher
pub struct EventDispatcher {
    config: DispatchConfig,
    registry: Arc<BreakpointRegistry>,
    voting: Arc<VotingEngine>,
    transport: Arc<dyn Transport>,
    evaluator: Arc<dyn ConditionEvaluator>,
    target: Arc<DebugTarget>,
    jobs: JobTracker,
    set_listeners: RwLock<Vec<Arc<dyn EventSetListener>>>,
    delivered_sets: AtomicU64,
}

impl EventDispatcher {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<BreakpointRegistry>,
        voting: Arc<VotingEngine>,
        transport: Arc<dyn Transport>,
        evaluator: Arc<dyn ConditionEvaluator>,
        target: Arc<DebugTarget>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            voting,
            transport,
            evaluator,
            target,
            jobs: JobTracker::new(),
            set_listeners: RwLock::new(Vec::new()),
            delivered_sets: AtomicU64::new(0),
        })
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EventSetListener>) {
        self.set_listeners.write().push(listener);
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EventSetListener>) {
        self.set_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn target(&self) -> &Arc<DebugTarget> {
        &self.target
    }

    /// Event sets delivered to generic listeners so far
    pub fn delivered_sets(&self) -> u64 {
        self.delivered_sets.load(Ordering::SeqCst)
    }

    /// Dispatch jobs spawned so far
    pub fn spawned_jobs(&self) -> u64 {
        self.jobs.spawned_count()
    }

    /// Wait for all in-flight dispatch jobs to finish (test support)
    pub async fn quiesce(&self) {
        self.jobs.quiesce().await;
    }

    /// Drain the transport's event-set stream until it closes or the target
    /// becomes unavailable. This is the single consumer for the target;
    /// sets are processed sequentially relative to each other.
    pub async fn run(&self, mut events: mpsc::Receiver<EventSet>) {
        while let Some(set) = events.recv().await {
            if !self.target.is_available() {
                tracing::debug!(
                    target_id = %self.target.id(),
                    availability = %self.target.availability(),
                    "Dropping event set; target is shutting down"
                );
                break;
            }
            self.handle_event_set(set).await;
        }
        tracing::debug!(target_id = %self.target.id(), "Event consumer finished");
    }

    /// Process one event set: deliver it whole to generic listeners, route
    /// each event to its breakpoint, then commit the set's decision.
    pub async fn handle_event_set(&self, set: EventSet) {
        self.delivered_sets.fetch_add(1, Ordering::SeqCst);
        let set_listeners = self.set_listeners.read().clone();
        for listener in set_listeners {
            listener.event_set(self.target.id(), &set);
        }

        let thread = set.thread();
        let mut work: Vec<Work> = Vec::new();
        let mut seen_keys: Vec<JobKey> = Vec::new();

        for event in set.events() {
            self.collect_work(event, &mut work, &mut seen_keys);
        }

        let commit = SetCommit::new(
            Arc::clone(&self.target),
            Arc::clone(&self.transport),
            thread,
            set.suspend_policy,
            work.len(),
        );

        if work.is_empty() {
            // Pure notification set; honor the suspend policy and move on
            commit.apply().await;
            return;
        }

        for item in work {
            match item {
                Work::Inline(decision) => commit.report(decision).await,
                Work::InstallJob { breakpoint, class } => {
                    let key = JobKey::new(breakpoint.id(), JobPhase::ClassPrepare);
                    let voting = Arc::clone(&self.voting);
                    let registry = Arc::clone(&self.registry);
                    let job_commit = Arc::clone(&commit);
                    let spawned = self.jobs.spawn(key, async move {
                        install_breakpoint(&voting, &registry, &breakpoint, &class);
                        job_commit.report(Decision::Resume).await;
                    });
                    if !spawned {
                        commit.report(Decision::Resume).await;
                    }
                }
                Work::HitJob { breakpoint } => {
                    let key = JobKey::new(breakpoint.id(), JobPhase::HitEvaluate);
                    let voting = Arc::clone(&self.voting);
                    let evaluator = Arc::clone(&self.evaluator);
                    let job_commit = Arc::clone(&commit);
                    let spawned = self.jobs.spawn(key, async move {
                        let decision =
                            evaluate_and_vote(&*evaluator, &voting, &breakpoint, thread).await;
                        job_commit.report(decision).await;
                    });
                    if !spawned {
                        commit.report(Decision::Resume).await;
                    }
                }
            }
        }
    }

    /// Route one event, appending the work it owes. Trivial notifications
    /// owe nothing; unconditional breakpoints resolve inline; conditional
    /// breakpoints defer to exactly one job per correlation.
    fn collect_work(&self, event: &Event, work: &mut Vec<Work>, seen_keys: &mut Vec<JobKey>) {
        match &event.kind {
            EventKind::ThreadStart => {
                self.target
                    .add_thread(event.thread, format!("thread-{}", event.thread));
            }
            EventKind::ThreadDeath => {
                self.target.remove_thread(event.thread);
            }
            EventKind::VmDeath => {
                tracing::info!(target_id = %self.target.id(), "VM death reported");
                if self.target.begin_terminate().is_ok() {
                    self.jobs.abort_all();
                }
            }
            EventKind::ClassPrepare => {
                let Some(class) = &event.class else {
                    tracing::warn!("Class-prepare event without class reference");
                    return;
                };
                self.target.class_loaded(class.clone());
                for bp in self.registry.matching_prepared_class(class) {
                    if bp.is_conditional() {
                        let key = JobKey::new(bp.id(), JobPhase::ClassPrepare);
                        if seen_keys.contains(&key) {
                            continue;
                        }
                        seen_keys.push(key);
                        work.push(Work::InstallJob {
                            breakpoint: bp,
                            class: class.clone(),
                        });
                    } else {
                        install_breakpoint(&self.voting, &self.registry, &bp, class);
                        work.push(Work::Inline(Decision::Resume));
                    }
                }
            }
            EventKind::MethodEntry if self.step_filtered(event) => {
                // Filtered types never reach voting
                work.push(Work::Inline(Decision::Resume));
            }
            kind if kind.is_breakpoint_kind() => {
                let breakpoint = event
                    .request
                    .and_then(|req| self.registry.breakpoint_for_request(req));
                match breakpoint {
                    Some(bp) => self.collect_hit(event, bp, work, seen_keys),
                    None => {
                        if let EventKind::ExceptionThrown { caught: false } = event.kind {
                            if self.config.suspend_on_uncaught_exceptions {
                                work.push(Work::Inline(Decision::Suspend));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_hit(
        &self,
        event: &Event,
        breakpoint: Breakpoint,
        work: &mut Vec<Work>,
        seen_keys: &mut Vec<JobKey>,
    ) {
        if !self.exception_state_matches(event, &breakpoint) {
            work.push(Work::Inline(Decision::Resume));
            return;
        }
        // Enabled flag, instance filter and hit-count countdown apply
        // before any listener is polled
        let Some(bp) = self.registry.filter_hit(breakpoint.id(), event.instance) else {
            work.push(Work::Inline(Decision::Resume));
            return;
        };
        if bp.is_conditional() {
            let key = JobKey::new(bp.id(), JobPhase::HitEvaluate);
            if seen_keys.contains(&key) {
                return;
            }
            seen_keys.push(key);
            work.push(Work::HitJob { breakpoint: bp });
        } else {
            let decision = self.voting.suspend_decision(&bp, event.thread);
            work.push(Work::Inline(decision));
        }
    }

    /// Exception breakpoints only fire for the caught/uncaught states they
    /// were registered for
    fn exception_state_matches(&self, event: &Event, breakpoint: &Breakpoint) -> bool {
        match (&event.kind, &breakpoint.kind) {
            (
                EventKind::ExceptionThrown { caught: hit_caught },
                BreakpointKind::Exception {
                    caught, uncaught, ..
                },
            ) => {
                if *hit_caught {
                    *caught
                } else {
                    *uncaught
                }
            }
            _ => true,
        }
    }

    fn step_filtered(&self, event: &Event) -> bool {
        let Some(class) = &event.class else {
            return false;
        };
        self.config
            .step_filters
            .iter()
            .any(|p| crate::breakpoints::matches_pattern(p, &class.name))
    }

    /// Flip the terminating guard and cancel all in-flight jobs. Fails if a
    /// disconnect is already in progress.
    pub fn terminate(&self) -> Result<()> {
        self.target.begin_terminate()?;
        self.jobs.abort_all();
        tracing::info!(target_id = %self.target.id(), "Target terminating");
        Ok(())
    }

    /// Flip the disconnecting guard and cancel all in-flight jobs. Fails if
    /// a terminate is already in progress.
    pub fn disconnect(&self) -> Result<()> {
        self.target.begin_disconnect()?;
        self.jobs.abort_all();
        tracing::info!(target_id = %self.target.id(), "Target disconnecting");
        Ok(())
    }
}

/// Install-vote a breakpoint into a freshly prepared type
fn install_breakpoint(
    voting: &VotingEngine,
    registry: &BreakpointRegistry,
    breakpoint: &Breakpoint,
    class: &ClassRef,
) {
    let decision = voting.install_decision(breakpoint, class);
    if !decision.is_affirmative() {
        tracing::debug!(
            breakpoint = %breakpoint.id(),
            class = %class.name,
            "Install vetoed; skipping"
        );
        return;
    }
    if let Err(e) = registry.mark_installed(breakpoint.id(), class) {
        tracing::warn!(
            breakpoint = %breakpoint.id(),
            class = %class.name,
            error = %e,
            "Failed to record breakpoint install"
        );
    } else {
        tracing::debug!(
            breakpoint = %breakpoint.id(),
            class = %class.name,
            "Installed breakpoint into prepared type"
        );
    }
}

/// Evaluate the condition inside the target VM, then poll the suspend vote.
/// Runs inside the hit-evaluate job, never on the consumer path.
async fn evaluate_and_vote(
    evaluator: &dyn ConditionEvaluator,
    voting: &VotingEngine,
    breakpoint: &Breakpoint,
    thread: ThreadId,
) -> Decision {
    match evaluator.evaluate(breakpoint, thread).await {
        Ok(true) => voting.suspend_decision(breakpoint, thread),
        Ok(false) => Decision::Resume,
        Err(e) => {
            // Reported once, counted as DONT_CARE: voting proceeds as if
            // the condition had matched
            voting.report_condition_error(breakpoint, &e);
            voting.suspend_decision(breakpoint, thread)
        }
    }
}
