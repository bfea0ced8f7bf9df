// crates/combinators/src/latest.rs
//! Latest call wins: a new call cancels the one still in flight.

use std::sync::{Arc, Mutex};

use jobtree_core::{Body, Job, JobsConfig, Subscription};

use crate::lock;
use crate::producer::Producer;
use crate::stream::{RequestState, StateStream};

pub struct Latest<A, T> {
    producer: Arc<Producer<A, T>>,
    stream: StateStream<T>,
    last: Arc<Mutex<Option<Job<T>>>>,
}

impl<A, T> Clone for Latest<A, T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            stream: self.stream.clone(),
            last: Arc::clone(&self.last),
        }
    }
}

impl<A, T> Latest<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `f`. Its jobs are built with `config`.
    pub fn new<F>(config: JobsConfig, f: F) -> Self
    where
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(Producer::new(config, f)),
            stream: StateStream::new(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Cancel the previous job if it is still pending, then start a new one.
    ///
    /// A superseded job is reported as `Cancelled` on the state stream, never
    /// as a value or an error.
    pub fn call(&self, args: A) -> Job<T> {
        let unstarted = self.producer.prepare(args);
        let previous = lock(&self.last).replace(unstarted.job().clone());
        if let Some(previous) = previous {
            if previous.cancel() {
                tracing::debug!(
                    superseded = previous.id(),
                    by = unstarted.job().id(),
                    "latest call superseded a pending job"
                );
                self.stream.emit(RequestState::Cancelled);
            }
        }
        self.stream.launch(unstarted)
    }

    /// Receive every state change, including supersessions.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RequestState<T>) + Send + Sync + 'static,
    {
        self.stream.subscribe(listener)
    }
}
