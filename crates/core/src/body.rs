// crates/core/src/body.rs
//! What a job runs.
//!
//! The shape of a body is chosen by the caller when the job is built, never
//! sniffed at runtime.

use std::future::Future;

use futures_util::future::BoxFuture;

use crate::job::Context;
use crate::steps::{self, Steps};

pub enum Body<T> {
    /// Already computed.
    Ready(anyhow::Result<T>),
    /// An ordinary async computation.
    Future(BoxFuture<'static, anyhow::Result<T>>),
    /// A step sequence, driven one yielded operation at a time.
    Steps(Box<dyn Steps<T>>),
    /// Produces another body once the job's context exists. The produced body
    /// runs inside the same job.
    Deferred(Box<dyn FnOnce(Context<T>) -> Body<T> + Send>),
}

impl<T> Body<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn ready(result: anyhow::Result<T>) -> Self {
        Self::Ready(result)
    }

    pub fn value(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Future(Box::pin(future))
    }

    pub fn steps<S>(steps: S) -> Self
    where
        S: Steps<T> + 'static,
    {
        Self::Steps(Box::new(steps))
    }

    pub fn deferred<F>(f: F) -> Self
    where
        F: FnOnce(Context<T>) -> Body<T> + Send + 'static,
    {
        Self::Deferred(Box::new(f))
    }

    pub(crate) async fn run(self, ctx: Context<T>) -> anyhow::Result<T> {
        let mut body = self;
        loop {
            body = match body {
                Self::Ready(result) => return result,
                Self::Future(future) => return future.await,
                Self::Steps(sequence) => return steps::drive(sequence, &ctx).await,
                Self::Deferred(f) => f(ctx.clone()),
            };
        }
    }
}

impl<T> std::fmt::Debug for Body<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Ready(_) => "Ready",
            Self::Future(_) => "Future",
            Self::Steps(_) => "Steps",
            Self::Deferred(_) => "Deferred",
        };
        f.write_str(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::steps::{from_fn, Step};

    #[tokio::test]
    async fn test_ready_body() {
        let job = Job::from_body(Body::value(7_i64));
        assert_eq!(job.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_nested_deferred_runs_in_same_job() {
        let job: Job<(u64, u64)> = Job::from_body(Body::deferred(|outer| {
            Body::deferred(move |inner| Body::value((outer.id(), inner.id())))
        }));
        let id = job.id();
        assert_eq!(job.await.unwrap(), (id, id));
    }

    #[tokio::test]
    async fn test_deferred_into_steps() {
        let job = Job::from_body(Body::deferred(|_ctx| {
            Body::steps(from_fn(|_input| Ok(Step::Complete("factory"))))
        }));
        assert_eq!(job.await.unwrap(), "factory");
    }

    #[test]
    fn test_body_debug_names_variant() {
        let body: Body<()> = Body::value(());
        assert_eq!(format!("{body:?}"), "Ready");
    }
}
