// crates/core/src/scope.rs
//! Ambient "current job" lookup.
//!
//! The active context lives in a tokio task-local, so every logical call chain
//! (task) sees its own innermost job even when many chains interleave on one
//! runtime. Installing a context is always scoped: the previous value is
//! restored on every exit path.

use std::borrow::Cow;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::Either;

use crate::error::{Cancelled, JobError};
use crate::job::JobId;
use crate::notifier::Subscription;

tokio::task_local! {
    static CURRENT: Scope;
}

/// Type-erased view of a running job, shared by parents and children of
/// different result types.
pub(crate) trait ScopeNode: Send + Sync {
    fn id(&self) -> JobId;
    fn is_cancelled(&self) -> bool;
    fn is_done(&self) -> bool;
    fn cancel(&self, reason: Cancelled) -> bool;
    fn on_cancel(&self, listener: Box<dyn Fn(&Cancelled) + Send + Sync>) -> Subscription;
    fn on_error(&self, listener: Box<dyn Fn(&JobError) + Send + Sync>) -> Subscription;
    fn on_success(&self, listener: Box<dyn Fn() + Send + Sync>) -> Subscription;
    fn on_done(&self, listener: Box<dyn Fn(Result<(), &JobError>) + Send + Sync>) -> Subscription;
    fn parent(&self) -> Option<Scope>;
}

/// Handle to a job whose result type is not known to the holder.
///
/// This is what [`current`] returns: enough to observe and cancel the
/// enclosing job, and to guard callbacks against it.
#[derive(Clone)]
pub struct Scope {
    node: Arc<dyn ScopeNode>,
}

impl Scope {
    pub(crate) fn new(node: Arc<dyn ScopeNode>) -> Self {
        Self { node }
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn ScopeNode> {
        Arc::downgrade(&self.node)
    }

    /// Id of the job.
    pub fn id(&self) -> JobId {
        self.node.id()
    }

    /// True if this job or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    /// True once the job has settled.
    pub fn is_done(&self) -> bool {
        self.node.is_done()
    }

    /// Cancel the job. Returns false if it had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        self.node.cancel(Cancelled::default())
    }

    /// Cancel with a custom message. Returns false if already settled.
    pub fn cancel_with(&self, message: impl Into<Cow<'static, str>>) -> bool {
        self.node.cancel(Cancelled::new(message))
    }

    /// Cancel the job and hand back the cancellation for `?`, like
    /// `Context::cancel`.
    pub fn raise(&self) -> Result<Infallible, Cancelled> {
        let reason = Cancelled::default();
        self.node.cancel(reason.clone());
        Err(reason)
    }

    /// [`Scope::raise`] with a custom message.
    pub fn raise_with(&self, message: impl Into<Cow<'static, str>>) -> Result<Infallible, Cancelled> {
        let reason = Cancelled::new(message);
        self.node.cancel(reason.clone());
        Err(reason)
    }

    /// Cooperative checkpoint.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled::default())
        } else {
            Ok(())
        }
    }

    /// Called with the reason when the job is cancelled.
    pub fn on_cancel<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Cancelled) + Send + Sync + 'static,
    {
        self.node.on_cancel(Box::new(listener))
    }

    /// Called when the job fails. Cancellation is not a failure.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobError) + Send + Sync + 'static,
    {
        self.node.on_error(Box::new(listener))
    }

    /// Called when the job succeeds. The value's type is erased here.
    pub fn on_success<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.node.on_success(Box::new(listener))
    }

    /// Called after success or failure, never on cancellation.
    pub fn on_done<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Result<(), &JobError>) + Send + Sync + 'static,
    {
        self.node.on_done(Box::new(listener))
    }

    /// The job this one was created under, if any.
    pub fn parent(&self) -> Option<Scope> {
        self.node.parent()
    }

    /// Guard `f` so it refuses to run once this job is cancelled.
    pub fn wrap<F>(&self, f: F) -> Guarded<F> {
        Guarded {
            scope: self.clone(),
            f,
        }
    }

    /// Guard each of `fs` like [`Scope::wrap`].
    pub fn wrap_all<F>(&self, fs: impl IntoIterator<Item = F>) -> Vec<Guarded<F>> {
        fs.into_iter().map(|f| self.wrap(f)).collect()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

/// A callback that checks its job for cancellation before every call.
#[derive(Clone)]
pub struct Guarded<F> {
    scope: Scope,
    f: F,
}

impl<F> Guarded<F> {
    pub fn call<A, R>(&self, args: A) -> Result<R, Cancelled>
    where
        F: Fn(A) -> R,
    {
        self.scope.check()?;
        Ok((self.f)(args))
    }

    /// Zero-argument form of [`Guarded::call`].
    pub fn invoke<R>(&self) -> Result<R, Cancelled>
    where
        F: Fn() -> R,
    {
        self.scope.check()?;
        Ok((self.f)())
    }
}

/// The innermost job running on the current call chain, if any.
pub fn current() -> Option<Scope> {
    CURRENT.try_with(Scope::clone).ok()
}

/// Run `future` with `scope` as the current job for its whole lifetime.
pub async fn run_with<F: Future>(scope: Scope, future: F) -> F::Output {
    CURRENT.scope(scope, future).await
}

/// Synchronous form of [`run_with`].
pub fn enter<R>(scope: Scope, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(scope, f)
}

/// Carry the current job into a future polled elsewhere.
///
/// Task-locals do not follow `tokio::spawn`; wrap the spawned future with
/// `bind` so jobs created inside it still attach to the caller's job.
pub fn bind<F: Future>(future: F) -> impl Future<Output = F::Output> {
    match current() {
        Some(scope) => Either::Left(CURRENT.scope(scope, future)),
        None => Either::Right(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use std::time::Duration;

    #[tokio::test]
    async fn test_current_is_none_outside_jobs() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_current_inside_job_is_that_job() {
        let job = Job::spawn(|ctx| async move {
            let scope = current().expect("inside a job");
            Ok(scope.id() == ctx.id())
        });
        assert!(job.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_chains_see_their_own_job() {
        let a = Job::spawn(|ctx| async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(3)).await;
                assert_eq!(current().map(|s| s.id()), Some(ctx.id()));
            }
            Ok(ctx.id())
        });
        let b = Job::spawn(|ctx| async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
                assert_eq!(current().map(|s| s.id()), Some(ctx.id()));
            }
            Ok(ctx.id())
        });
        let (a_id, b_id) = (a.id(), b.id());
        assert_eq!(a.await.unwrap(), a_id);
        assert_eq!(b.await.unwrap(), b_id);
    }

    #[tokio::test]
    async fn test_scope_restored_after_nested_run() {
        let outer = Job::spawn(|ctx| async move {
            let inner = Job::spawn(|inner_ctx| async move { Ok(inner_ctx.id()) });
            let inner_id = inner.await?;
            assert_ne!(inner_id, ctx.id());
            Ok(current().map(|s| s.id()) == Some(ctx.id()))
        });
        assert!(outer.await.unwrap());
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_bind_carries_scope_across_spawn() {
        let job = Job::spawn(|ctx| async move {
            let seen = tokio::spawn(bind(async { current().map(|s| s.id()) })).await?;
            let unbound = tokio::spawn(async { current().map(|s| s.id()) }).await?;
            Ok((seen == Some(ctx.id()), unbound.is_none()))
        });
        assert_eq!(job.await.unwrap(), (true, true));
    }

    #[tokio::test]
    async fn test_guarded_refuses_after_cancel() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job: Job<()> = Job::spawn(|_ctx| async move {
            std::future::pending::<()>().await;
            Ok(())
        });
        let guarded = job.scope().wrap(move |n: usize| {
            counter.fetch_add(n, std::sync::atomic::Ordering::SeqCst)
        });

        assert!(guarded.call(2).is_ok());
        job.cancel();
        assert!(guarded.call(5).is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_current_observes_settlement() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let record = Arc::clone(&log);
        let ok: Job<u8> = Job::spawn(move |_ctx| async move {
            let scope = current().expect("inside a job");
            let on_success = Arc::clone(&record);
            scope.on_success(move || on_success.lock().unwrap().push("success".to_string()));
            let on_done = Arc::clone(&record);
            scope.on_done(move |result| {
                on_done.lock().unwrap().push(format!("done ok={}", result.is_ok()))
            });
            Ok(1)
        });
        assert_eq!(ok.await.unwrap(), 1);

        let record = Arc::clone(&log);
        let failing: Job<u8> = Job::spawn(move |_ctx| async move {
            let scope = current().expect("inside a job");
            let on_error = Arc::clone(&record);
            scope.on_error(move |error| on_error.lock().unwrap().push(format!("error {error}")));
            let on_done = Arc::clone(&record);
            scope.on_done(move |result| {
                on_done.lock().unwrap().push(format!("done ok={}", result.is_ok()))
            });
            anyhow::bail!("broken")
        });
        assert!(failing.await.is_err());

        assert_eq!(
            *log.lock().unwrap(),
            vec!["success", "done ok=true", "error broken", "done ok=false"]
        );
    }

    #[tokio::test]
    async fn test_raise_cancels_the_ambient_job() {
        let job: Job<()> = Job::spawn(|_ctx| async {
            let scope = current().expect("inside a job");
            scope.raise_with("stopped from a helper")?;
            Ok(())
        });
        let err = job.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "stopped from a helper");
        assert_eq!(job.state(), crate::job::JobState::Cancelled);
    }
}
