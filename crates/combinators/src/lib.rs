// crates/combinators/src/lib.rs
//! Call-coalescing wrappers over repeated job creation.
//!
//! Each wrapper turns a job-producing function into something you call
//! repeatedly, and reports the progress of its jobs on a
//! [`RequestState`] stream:
//! - [`Func`]: one job per call
//! - [`Latest`]: a new call cancels the previous pending job
//! - [`Throttle`]: at most one new job per window
//! - [`Debounce`]: one job once calls stop for a window
//!
//! [`Jobs`] bundles job construction and all four wrappers behind one
//! configured entry point.

mod debounce;
mod func;
mod latest;
mod producer;
mod stream;
mod throttle;

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use jobtree_core::{Body, Context, Job, JobsConfig, Scope, Steps};

pub use debounce::Debounce;
pub use func::Func;
pub use latest::Latest;
pub use stream::{RequestState, StateStream};
pub use throttle::Throttle;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("combinator state lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Job construction and combinators sharing one [`JobsConfig`].
#[derive(Debug, Clone, Default)]
pub struct Jobs {
    config: JobsConfig,
}

impl Jobs {
    pub fn new(config: JobsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// The innermost job running on this call chain.
    pub fn current(&self) -> Option<Scope> {
        jobtree_core::current()
    }

    pub fn run<T>(&self, body: Body<T>) -> Job<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Job::from_body_with(&self.config, body)
    }

    pub fn spawn<T, F, Fut>(&self, f: F) -> Job<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Context<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.run(Body::deferred(move |ctx| Body::future(f(ctx))))
    }

    pub fn spawn_steps<T, F, S>(&self, f: F) -> Job<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Context<T>) -> S + Send + 'static,
        S: Steps<T> + 'static,
    {
        self.run(Body::deferred(move |ctx| Body::steps(f(ctx))))
    }

    pub fn func<A, T, F>(&self, f: F) -> Func<A, T>
    where
        A: Send + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Func::new(self.config.clone(), f)
    }

    pub fn latest<A, T, F>(&self, f: F) -> Latest<A, T>
    where
        A: Send + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Latest::new(self.config.clone(), f)
    }

    pub fn throttle<A, T, F>(&self, window: Duration, f: F) -> Throttle<A, T>
    where
        A: Send + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Throttle::new(self.config.clone(), window, f)
    }

    pub fn debounce<A, T, F>(&self, window: Duration, f: F) -> Debounce<A, T>
    where
        A: Send + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Debounce::new(self.config.clone(), window, f)
    }
}

pub fn func<A, T, F>(f: F) -> Func<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Body<T> + Send + Sync + 'static,
{
    Jobs::default().func(f)
}

pub fn latest<A, T, F>(f: F) -> Latest<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Body<T> + Send + Sync + 'static,
{
    Jobs::default().latest(f)
}

pub fn throttle<A, T, F>(window: Duration, f: F) -> Throttle<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Body<T> + Send + Sync + 'static,
{
    Jobs::default().throttle(window, f)
}

pub fn debounce<A, T, F>(window: Duration, f: F) -> Debounce<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Body<T> + Send + Sync + 'static,
{
    Jobs::default().debounce(window, f)
}
