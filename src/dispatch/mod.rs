//! Event dispatch: voting, dispatch jobs and the per-target dispatcher

pub mod dispatcher;
pub mod job;
pub mod voting;

pub use dispatcher::{ConditionEvaluator, EventDispatcher, EventSetListener};
pub use job::{JobKey, JobPhase, JobTracker};
pub use voting::{reduce, Decision, Vote, VoteListener, VotingEngine};
