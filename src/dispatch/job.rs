//! Dispatch jobs
//!
//! A dispatch job is the unit of deferred work correlating a class-prepare
//! notification with a later breakpoint hit for one conditional breakpoint.
//! Its identity is stable for the life of that correlation: the tracker
//! refuses to fabricate a second job while one with the same key is live,
//! and trivial events never allocate a job at all.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

use crate::protocol::BreakpointId;

/// Phase of a conditional-breakpoint correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Install decision when a matching class prepares
    ClassPrepare,
    /// In-VM condition evaluation plus suspend vote after a hit
    HitEvaluate,
}

/// Stable identity of one correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub breakpoint: BreakpointId,
    pub phase: JobPhase,
}

impl JobKey {
    pub fn new(breakpoint: BreakpointId, phase: JobPhase) -> Self {
        Self { breakpoint, phase }
    }
}

/// Tracks the live dispatch jobs of one target
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobKey, JoinHandle<()>>>,
    spawned: AtomicU64,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a job for `key` unless one is already live for the same
    /// correlation. Returns whether a job was spawned.
    pub fn spawn<F>(&self, key: JobKey, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock();
        jobs.retain(|_, handle| !handle.is_finished());
        if jobs.contains_key(&key) {
            tracing::debug!(?key, "Correlation already has a live job; not spawning");
            return false;
        }
        let handle = tokio::spawn(work);
        jobs.insert(key, handle);
        self.spawned.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Total jobs ever spawned
    pub fn spawned_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Live (unfinished) jobs
    pub fn live_count(&self) -> usize {
        let mut jobs = self.jobs.lock();
        jobs.retain(|_, handle| !handle.is_finished());
        jobs.len()
    }

    /// Abort every in-flight job; called when the owning target terminates
    /// or disconnects
    pub fn abort_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        let count = jobs.len();
        for (_, handle) in jobs {
            handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "Aborted in-flight dispatch jobs");
        }
    }

    /// Wait for every currently tracked job to finish (test support)
    pub async fn quiesce(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for (_, handle) in jobs {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_live_correlation_is_not_duplicated() {
        let tracker = Arc::new(JobTracker::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let key = JobKey::new(BreakpointId(1), JobPhase::HitEvaluate);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let ran2 = ran.clone();
        assert!(tracker.spawn(key, async move {
            let _ = rx.await;
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        // Same correlation while the first job is live: refused
        assert!(!tracker.spawn(key, async {}));
        assert_eq!(tracker.spawned_count(), 1);

        tx.send(()).unwrap();
        tracker.quiesce().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // Correlation completed; a new occurrence may allocate a new job
        assert!(tracker.spawn(key, async {}));
        tracker.quiesce().await;
        assert_eq!(tracker.spawned_count(), 2);
    }

    #[tokio::test]
    async fn test_abort_all_clears_in_flight_jobs() {
        let tracker = JobTracker::new();
        let key = JobKey::new(BreakpointId(2), JobPhase::ClassPrepare);
        assert!(tracker.spawn(key, async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }));
        assert_eq!(tracker.live_count(), 1);
        tracker.abort_all();
        assert_eq!(tracker.live_count(), 0);
    }
}
