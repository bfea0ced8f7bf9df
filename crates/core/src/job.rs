// crates/core/src/job.rs
//! The cancellable, observable unit of asynchronous work.
//!
//! A [`Job`] runs its [`Body`] on a tokio task with its own [`Context`]
//! installed as the current scope. Jobs created while that body runs become
//! its children: cancelling a job cancels every pending descendant.

use std::borrow::Cow;
use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::Instrument;

use crate::body::Body;
use crate::config::JobsConfig;
use crate::error::{Cancelled, JobError};
use crate::notifier::{lock, Notifier, Subscription};
use crate::scope::{self, Guarded, Scope, ScopeNode};
use crate::steps::Steps;

/// Unique identifier for a job, monotonically increasing per process.
pub type JobId = u64;

/// Final result of a job as seen by awaiters and `on_done` listeners.
pub type Outcome<T> = Result<T, JobError>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobState {
    Pending = 0,
    Succeeded = 1,
    Failed = 2,
    Cancelled = 3,
}

impl JobState {
    /// Whether the job has settled.
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<u8> for JobState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Succeeded,
            2 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Cancel,
    Error,
    Success,
    Done,
}

pub(crate) struct JobInner<T> {
    id: JobId,
    label: Cow<'static, str>,
    parent: Option<Weak<dyn ScopeNode>>,
    state: AtomicU8,
    events: Notifier<Event, Outcome<T>>,
    outcome: watch::Sender<Option<Outcome<T>>>,
    parent_link: Mutex<Option<Subscription>>,
}

impl<T> JobInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(label: Cow<'static, str>) -> Arc<Self> {
        let parent = scope::current();
        let (outcome, _) = watch::channel(None);
        let inner = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            label,
            parent: parent.as_ref().map(Scope::downgrade),
            state: AtomicU8::new(JobState::Pending as u8),
            events: Notifier::new(),
            outcome,
            parent_link: Mutex::new(None),
        });

        if let Some(parent) = parent {
            let child = Arc::downgrade(&inner);
            let link = parent.on_cancel(move |reason| {
                if let Some(child) = child.upgrade() {
                    child.force_cancel(reason.clone());
                }
            });
            *lock(&inner.parent_link) = Some(link);
            tracing::trace!(job_id = inner.id, parent_id = parent.id(), "job linked to parent");
        }

        inner
    }

    fn state(&self) -> JobState {
        JobState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, next: JobState) -> bool {
        self.state
            .compare_exchange(
                JobState::Pending as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.state() == JobState::Cancelled
            || self
                .parent
                .as_ref()
                .and_then(Weak::upgrade)
                .is_some_and(|parent| parent.is_cancelled())
    }

    fn force_cancel(&self, reason: Cancelled) -> bool {
        if !self.transition(JobState::Cancelled) {
            return false;
        }
        tracing::debug!(job_id = self.id, reason = reason.message(), "job cancelled");
        self.settle(&[Event::Cancel], Err(JobError::Cancelled(reason)));
        true
    }

    /// Notify listeners, then publish `outcome` to awaiters and clean up.
    ///
    /// Publishing happens in a drop guard: a panicking listener propagates to
    /// the caller, but awaiters are still released while it unwinds.
    fn settle(&self, events: &[Event], outcome: Outcome<T>) {
        let settled = Settled {
            inner: self,
            outcome,
        };
        self.events.emit(events, &settled.outcome);
    }

    fn finish(&self, outcome: Outcome<T>) {
        let (next, events) = match &outcome {
            Err(JobError::Cancelled(reason)) => {
                self.force_cancel(reason.clone());
                return;
            }
            Ok(_) => (JobState::Succeeded, [Event::Success, Event::Done]),
            Err(_) => (JobState::Failed, [Event::Error, Event::Done]),
        };
        if !self.transition(next) {
            tracing::trace!(job_id = self.id, "body finished after job settled");
            return;
        }
        match &outcome {
            Ok(_) => tracing::debug!(job_id = self.id, state = %next, "job settled"),
            Err(e) => tracing::debug!(job_id = self.id, state = %next, error = %e, "job settled"),
        }
        self.settle(&events, outcome);
    }

    fn cleanup(&self) {
        self.events.clear();
        let link = lock(&self.parent_link).take();
        if let Some(link) = link {
            link.unsubscribe();
        }
    }

    fn subscribe<F>(&self, event: Event, listener: F) -> Subscription
    where
        F: Fn(&Outcome<T>) + Send + Sync + 'static,
    {
        self.events.subscribe(event, listener)
    }

    fn on_cancel<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Cancelled) + Send + Sync + 'static,
    {
        self.subscribe(Event::Cancel, move |outcome| {
            if let Err(JobError::Cancelled(reason)) = outcome {
                listener(reason);
            }
        })
    }

    fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobError) + Send + Sync + 'static,
    {
        self.subscribe(Event::Error, move |outcome| {
            if let Err(error) = outcome {
                listener(error);
            }
        })
    }

    fn on_success<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(Event::Success, move |outcome| {
            if let Ok(value) = outcome {
                listener(value);
            }
        })
    }

    async fn wait(&self) -> Outcome<T> {
        let mut rx = self.outcome.subscribe();
        if let Ok(slot) = rx.wait_for(Option::is_some).await {
            if let Some(outcome) = slot.clone() {
                return outcome;
            }
        }
        // The sender lives as long as `self`, so this is unreachable.
        Err(Cancelled::default().into())
    }

    fn launch(self: Arc<Self>, body: Body<T>, catch_panics: bool) {
        let span = tracing::debug_span!("job", id = self.id, label = %self.label);
        tokio::spawn(
            async move {
                if self.is_cancelled() {
                    // Parent was cancelled before the first turn: never run the body.
                    self.force_cancel(Cancelled::default());
                    return;
                }
                let ctx = Context {
                    inner: Arc::clone(&self),
                };
                let scope = ctx.scope();
                let run = AssertUnwindSafe(scope::run_with(scope, body.run(ctx)))
                    .catch_unwind()
                    .await;
                match run {
                    Ok(Ok(value)) => self.finish(Ok(value)),
                    Ok(Err(error)) => self.finish(Err(JobError::classify(error))),
                    Err(payload) => {
                        let error = JobError::from_panic(&*payload);
                        tracing::warn!(job_id = self.id, error = %error, "job body panicked");
                        self.finish(Err(error));
                        if !catch_panics {
                            std::panic::resume_unwind(payload);
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

struct Settled<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: &'a JobInner<T>,
    outcome: Outcome<T>,
}

impl<T> Drop for Settled<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!(job_id = self.inner.id, "lifecycle listener panicked");
        }
        self.inner.outcome.send_replace(Some(self.outcome.clone()));
        self.inner.cleanup();
    }
}

impl<T> ScopeNode for JobInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> JobId {
        self.id
    }

    fn is_cancelled(&self) -> bool {
        JobInner::is_cancelled(self)
    }

    fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    fn cancel(&self, reason: Cancelled) -> bool {
        self.force_cancel(reason)
    }

    fn on_cancel(&self, listener: Box<dyn Fn(&Cancelled) + Send + Sync>) -> Subscription {
        JobInner::on_cancel(self, listener)
    }

    fn on_error(&self, listener: Box<dyn Fn(&JobError) + Send + Sync>) -> Subscription {
        JobInner::on_error(self, listener)
    }

    fn on_success(&self, listener: Box<dyn Fn() + Send + Sync>) -> Subscription {
        JobInner::on_success(self, move |_| listener())
    }

    fn on_done(&self, listener: Box<dyn Fn(Result<(), &JobError>) + Send + Sync>) -> Subscription {
        self.subscribe(Event::Done, move |outcome| match outcome {
            Ok(_) => listener(Ok(())),
            Err(error) => listener(Err(error)),
        })
    }

    fn parent(&self) -> Option<Scope> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Scope::new)
    }
}

/// Handle to a job.
///
/// Cloning is cheap and every clone observes the same outcome. Await the
/// handle (or call [`Job::wait`]) for the result.
pub struct Job<T> {
    inner: Arc<JobInner<T>>,
}

impl<T> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Job<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start a job running `f` as an async body.
    ///
    /// The job becomes a child of the job currently running on this call
    /// chain, if any. Panics when called outside a tokio runtime.
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_body(Body::deferred(move |ctx| Body::future(f(ctx))))
    }

    /// Start a job whose body is a step sequence driven one operation at a time.
    pub fn spawn_steps<F, S>(f: F) -> Self
    where
        F: FnOnce(Context<T>) -> S + Send + 'static,
        S: Steps<T> + 'static,
    {
        Self::from_body(Body::deferred(move |ctx| Body::steps(f(ctx))))
    }

    /// Start a job from an explicit [`Body`] with the default config.
    pub fn from_body(body: Body<T>) -> Self {
        Self::from_body_with(&JobsConfig::default(), body)
    }

    /// Start a job from an explicit [`Body`] with `config`.
    pub fn from_body_with(config: &JobsConfig, body: Body<T>) -> Self {
        Self::unstarted(config, body).start()
    }

    /// Create a job without running its body yet.
    ///
    /// Listeners attached before [`Unstarted::start`] cannot miss any event.
    pub fn unstarted(config: &JobsConfig, body: Body<T>) -> Unstarted<T> {
        let job = Self {
            inner: JobInner::new(config.label.clone()),
        };
        tracing::debug!(job_id = job.id(), label = %config.label, "job created");
        Unstarted {
            job,
            body: Some(body),
            catch_panics: config.catch_panics,
        }
    }

    /// Process-unique id of this job.
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.inner.state()
    }

    /// True if this job or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// True once the job has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.inner.state().is_terminal()
    }

    /// Cancel the job and every pending descendant.
    ///
    /// Returns false, with no other effect, if the job had already settled.
    pub fn cancel(&self) -> bool {
        self.inner.force_cancel(Cancelled::default())
    }

    /// Cancel with a custom message. Returns false if already settled.
    pub fn cancel_with(&self, message: impl Into<Cow<'static, str>>) -> bool {
        self.inner.force_cancel(Cancelled::new(message))
    }

    /// Called with the reason when the job is cancelled.
    pub fn on_cancel<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Cancelled) + Send + Sync + 'static,
    {
        self.inner.on_cancel(listener)
    }

    /// Called when the job fails. Cancellation is not a failure.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobError) + Send + Sync + 'static,
    {
        self.inner.on_error(listener)
    }

    /// Called with the value when the job succeeds.
    pub fn on_success<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.on_success(listener)
    }

    /// Fires after `on_success` or `on_error`; not on cancellation.
    pub fn on_done<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Outcome<T>) + Send + Sync + 'static,
    {
        self.inner.subscribe(Event::Done, listener)
    }

    /// Wait for the outcome. Same as awaiting the handle.
    pub async fn wait(&self) -> Outcome<T> {
        self.inner.wait().await
    }

    /// Type-erased handle to this job.
    pub fn scope(&self) -> Scope {
        Scope::new(Arc::clone(&self.inner) as Arc<dyn ScopeNode>)
    }
}

impl<T> IntoFuture for Job<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.inner.wait().await })
    }
}

impl<'a, T> IntoFuture for &'a Job<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'a, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.inner.wait())
    }
}

impl<T> std::fmt::Debug for Job<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.inner.state())
            .finish()
    }
}

/// A job whose body has not been handed to the runtime yet.
///
/// Dropping it without calling [`Unstarted::start`] cancels the job.
pub struct Unstarted<T>
where
    T: Clone + Send + Sync + 'static,
{
    job: Job<T>,
    body: Option<Body<T>>,
    catch_panics: bool,
}

impl<T> Unstarted<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The job this will run, for attaching listeners before it starts.
    pub fn job(&self) -> &Job<T> {
        &self.job
    }

    /// Hand the body to the runtime.
    pub fn start(mut self) -> Job<T> {
        if let Some(body) = self.body.take() {
            Arc::clone(&self.job.inner).launch(body, self.catch_panics);
        }
        self.job.clone()
    }
}

impl<T> Drop for Unstarted<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.body.is_some() {
            self.job.cancel_with("job was never started");
        }
    }
}

/// Capability handle passed to a job's body.
pub struct Context<T> {
    inner: Arc<JobInner<T>>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Context<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Id of the job running this body.
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// True if this job or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// True once the job has settled.
    pub fn is_done(&self) -> bool {
        self.inner.state().is_terminal()
    }

    /// Cancel this job and stop the calling step.
    ///
    /// Always returns `Err`; propagate it with `?` so nothing after the call
    /// runs.
    pub fn cancel(&self) -> Result<Infallible, Cancelled> {
        let reason = Cancelled::default();
        self.inner.force_cancel(reason.clone());
        Err(reason)
    }

    /// [`Context::cancel`] with a custom message.
    pub fn cancel_with(&self, message: impl Into<Cow<'static, str>>) -> Result<Infallible, Cancelled> {
        let reason = Cancelled::new(message);
        self.inner.force_cancel(reason.clone());
        Err(reason)
    }

    /// Cooperative checkpoint for plain async bodies.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled::default())
        } else {
            Ok(())
        }
    }

    /// Called with the reason when this job is cancelled.
    pub fn on_cancel<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Cancelled) + Send + Sync + 'static,
    {
        self.inner.on_cancel(listener)
    }

    /// Called when this job fails.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobError) + Send + Sync + 'static,
    {
        self.inner.on_error(listener)
    }

    /// Called with the value when this job succeeds.
    pub fn on_success<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.on_success(listener)
    }

    /// Called after success or failure, never on cancellation.
    pub fn on_done<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Outcome<T>) + Send + Sync + 'static,
    {
        self.inner.subscribe(Event::Done, listener)
    }

    /// Guard `f` so it refuses to run once this job is cancelled.
    pub fn wrap<F>(&self, f: F) -> Guarded<F> {
        self.scope().wrap(f)
    }

    /// Guard each of `fs` like [`Context::wrap`].
    pub fn wrap_all<F>(&self, fs: impl IntoIterator<Item = F>) -> Vec<Guarded<F>> {
        self.scope().wrap_all(fs)
    }

    /// The job this one was created under, if any.
    pub fn parent(&self) -> Option<Scope> {
        ScopeNode::parent(&*self.inner)
    }

    /// Type-erased handle to this job.
    pub fn scope(&self) -> Scope {
        Scope::new(Arc::clone(&self.inner) as Arc<dyn ScopeNode>)
    }
}
