// crates/combinators/src/stream.rs
//! Request-state stream shared by every combinator wrapper.
//!
//! A job that is cancelled from outside its wrapper, for example because the
//! job that called the wrapper was cancelled, leaves the stream at `loading`.
//! Only `latest` emits `cancelled`, when a newer call supersedes a pending job.

use std::sync::Arc;

use jobtree_core::{Job, JobError, Notifier, Subscription, Unstarted};
use serde::{Serialize, Serializer};

/// Progress of the most recent call made through a wrapper.
///
/// Serializes as `{"state": "hasValue", "value": ...}` and friends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RequestState<T> {
    Loading,
    HasValue {
        value: T,
    },
    HasError {
        #[serde(serialize_with = "error_message")]
        error: JobError,
    },
    Cancelled,
}

impl<T> RequestState<T> {
    /// The camelCase state name, as serialized.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::HasValue { .. } => "hasValue",
            Self::HasError { .. } => "hasError",
            Self::Cancelled => "cancelled",
        }
    }
}

fn error_message<S: Serializer>(error: &JobError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StreamEvent {
    Change,
}

pub struct StateStream<T> {
    notifier: Arc<Notifier<StreamEvent, RequestState<T>>>,
}

impl<T> Clone for StateStream<T> {
    fn clone(&self) -> Self {
        Self {
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<T> StateStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            notifier: Arc::new(Notifier::new()),
        }
    }

    /// Receive every state change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RequestState<T>) + Send + Sync + 'static,
    {
        self.notifier.subscribe(StreamEvent::Change, listener)
    }

    pub(crate) fn emit(&self, state: RequestState<T>) {
        self.notifier.emit(&[StreamEvent::Change], &state);
    }

    /// Announce a fresh job, mirror its settlement, then let it run.
    ///
    /// Cancellation is not mirrored: only `latest` reports it, explicitly.
    pub(crate) fn launch(&self, unstarted: Unstarted<T>) -> Job<T> {
        self.emit(RequestState::Loading);
        let job = unstarted.job();
        let stream = self.clone();
        job.on_success(move |value| {
            stream.emit(RequestState::HasValue {
                value: value.clone(),
            })
        });
        let stream = self.clone();
        job.on_error(move |error| {
            stream.emit(RequestState::HasError {
                error: error.clone(),
            })
        });
        unstarted.start()
    }
}

impl<T> Default for StateStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtree_core::Cancelled;
    use serde_json::json;

    #[test]
    fn test_request_state_serialization() {
        let loading: RequestState<i32> = RequestState::Loading;
        assert_eq!(serde_json::to_value(&loading).unwrap(), json!({"state": "loading"}));

        let value = RequestState::HasValue { value: 3 };
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"state": "hasValue", "value": 3})
        );

        let error: RequestState<i32> = RequestState::HasError {
            error: JobError::failed(anyhow::anyhow!("boom")),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"state": "hasError", "error": "boom"})
        );

        let cancelled: RequestState<i32> = RequestState::Cancelled;
        assert_eq!(
            serde_json::to_value(&cancelled).unwrap(),
            json!({"state": "cancelled"})
        );
    }

    #[test]
    fn test_kind_names() {
        let states: Vec<RequestState<()>> = vec![
            RequestState::Loading,
            RequestState::HasValue { value: () },
            RequestState::HasError {
                error: Cancelled::default().into(),
            },
            RequestState::Cancelled,
        ];
        let kinds: Vec<_> = states.iter().map(RequestState::kind).collect();
        assert_eq!(kinds, vec!["loading", "hasValue", "hasError", "cancelled"]);
    }
}
