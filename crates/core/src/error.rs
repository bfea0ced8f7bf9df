// crates/core/src/error.rs
use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use thiserror::Error;

/// Message carried by a cancellation when no explicit one was given.
pub const DEFAULT_CANCEL_MESSAGE: &str = "A job has been cancelled";

/// Signals that a job, or one of its ancestors, was cancelled.
///
/// Never reported through `on_error`; cancellation has its own event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Cancelled {
    message: Cow<'static, str>,
}

impl Cancelled {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for Cancelled {
    fn default() -> Self {
        Self::new(DEFAULT_CANCEL_MESSAGE)
    }
}

/// Terminal error of a job.
///
/// `Clone` because every awaiter of a shared [`crate::Job`] observes the same
/// outcome.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    #[error("a yielded value must be an operation descriptor, got {found}")]
    Protocol { found: String },

    #[error("job body panicked: {message}")]
    Panicked { message: String },
}

impl JobError {
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(error.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Route an error returned by a job body.
    ///
    /// Cancellations and errors propagated from awaited jobs keep their
    /// identity; anything else becomes [`JobError::Failed`].
    pub fn classify(error: anyhow::Error) -> Self {
        if let Some(cancelled) = error.downcast_ref::<Cancelled>() {
            return Self::Cancelled(cancelled.clone());
        }
        if let Some(job_error) = error.downcast_ref::<JobError>() {
            return job_error.clone();
        }
        Self::Failed(Arc::new(error))
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}
