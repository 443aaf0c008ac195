mod job;
pub mod mirror;
mod state;
mod store;

pub use job::{Job, JobAction, JobState, Target};
pub use state::{RetryConfig, StateMachine, Transition};
pub use store::{Enqueued, JobQueue, QueueCounts, QueueSnapshot};
