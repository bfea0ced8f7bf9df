// crates/core/src/lib.rs
//! Cancellable, hierarchical jobs over tokio.
//!
//! Provides:
//! - `Job`: a cancellable, awaitable unit of work with lifecycle events
//! - `Context`: the capability handle a job body receives
//! - `scope`: task-local lookup of the innermost running job
//! - `steps`: the stepwise body protocol with per-step cancellation checks
//! - `Notifier`: the synchronous pub/sub used for lifecycle events

pub mod body;
pub mod config;
pub mod error;
pub mod job;
pub mod notifier;
pub mod scope;
pub mod steps;

pub use body::Body;
pub use config::JobsConfig;
pub use error::{Cancelled, JobError, DEFAULT_CANCEL_MESSAGE};
pub use job::{Context, Event, Job, JobId, JobState, Outcome, Unstarted};
pub use notifier::{Notifier, Subscription};
pub use scope::{current, Guarded, Scope};
pub use steps::{Operation, Step, Steps, Yielded};

/// Start a job running `f`. See [`Job::spawn`].
pub fn spawn<T, F, Fut>(f: F) -> Job<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(Context<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Job::spawn(f)
}
