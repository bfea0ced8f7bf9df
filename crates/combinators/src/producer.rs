// crates/combinators/src/producer.rs
use std::sync::Arc;

use jobtree_core::{Body, Job, JobsConfig, Unstarted};

type ProduceFn<A, T> = dyn Fn(A) -> Body<T> + Send + Sync;

/// The user function behind a wrapper, plus the options its jobs get.
pub(crate) struct Producer<A, T> {
    f: Arc<ProduceFn<A, T>>,
    config: JobsConfig,
}

impl<A, T> Producer<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F>(config: JobsConfig, f: F) -> Self
    where
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            config,
        }
    }

    /// Build, but do not start, a job for one call.
    ///
    /// The user function itself runs inside the job, so jobs it creates
    /// become children of this one.
    pub(crate) fn prepare(&self, args: A) -> Unstarted<T> {
        let f = Arc::clone(&self.f);
        Job::unstarted(&self.config, Body::deferred(move |_ctx| f(args)))
    }
}
