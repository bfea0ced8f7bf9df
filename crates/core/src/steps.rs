// crates/core/src/steps.rs
//! Stepwise execution of a job body.
//!
//! A step sequence yields one operation descriptor at a time. The driver
//! checks for cancellation before every resume, invokes the operation, and
//! feeds its result into the next resume. Values crossing the protocol are
//! `serde_json::Value` because one sequence mixes operations of different
//! result types.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::JobError;
use crate::job::Context;

type OperationFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// An invocable that a step sequence asks the driver to run.
#[derive(Clone)]
pub struct Operation {
    f: Arc<OperationFn>,
}

impl Operation {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// An operation that completes without suspending.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }

    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> {
        (self.f)(args)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Operation")
    }
}

/// What a sequence hands back to the driver at a suspension point.
#[derive(Debug, Clone)]
pub enum Yielded {
    /// Invoke `op(args)` and resume with its result.
    Call { op: Operation, args: Vec<Value> },
    /// Resume immediately with the previous result.
    Empty,
    /// A bare value. Rejected: every non-empty yield must name an operation.
    Value(Value),
}

#[derive(Debug)]
pub enum Step<T> {
    Yield(Yielded),
    Complete(T),
}

impl<T> Step<T> {
    pub fn call(op: &Operation, args: impl IntoIterator<Item = Value>) -> Self {
        Self::Yield(Yielded::Call {
            op: op.clone(),
            args: args.into_iter().collect(),
        })
    }
}

/// A resumable sequence of steps.
///
/// `resume` receives the result of the previously yielded operation (`None`
/// on the first call).
#[async_trait]
pub trait Steps<T>: Send {
    async fn resume(&mut self, input: Option<Value>) -> anyhow::Result<Step<T>>;
}

/// Build a [`Steps`] from a synchronous closure.
pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
    F: FnMut(Option<Value>) -> anyhow::Result<Step<T>> + Send,
{
    FromFn { f }
}

pub struct FromFn<F> {
    f: F,
}

#[async_trait]
impl<T, F> Steps<T> for FromFn<F>
where
    T: Send,
    F: FnMut(Option<Value>) -> anyhow::Result<Step<T>> + Send,
{
    async fn resume(&mut self, input: Option<Value>) -> anyhow::Result<Step<T>> {
        (self.f)(input)
    }
}

pub(crate) async fn drive<T>(mut sequence: Box<dyn Steps<T>>, ctx: &Context<T>) -> anyhow::Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    let mut last: Option<Value> = None;
    let mut calls = 0_usize;
    loop {
        ctx.check()?;
        match sequence.resume(last.clone()).await? {
            Step::Complete(value) => {
                tracing::trace!(job_id = ctx.id(), calls, "step sequence complete");
                return Ok(value);
            }
            Step::Yield(Yielded::Empty) => {}
            Step::Yield(Yielded::Value(found)) => {
                return Err(JobError::Protocol {
                    found: describe(&found).to_string(),
                }
                .into());
            }
            Step::Yield(Yielded::Call { op, args }) => {
                last = Some(op.call(args).await?);
                calls += 1;
            }
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
