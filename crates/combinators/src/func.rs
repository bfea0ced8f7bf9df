// crates/combinators/src/func.rs
//! One job per call, no coalescing.

use std::sync::Arc;

use jobtree_core::{Body, Job, JobsConfig, Subscription};

use crate::producer::Producer;
use crate::stream::{RequestState, StateStream};

pub struct Func<A, T> {
    producer: Arc<Producer<A, T>>,
    stream: StateStream<T>,
}

impl<A, T> Clone for Func<A, T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            stream: self.stream.clone(),
        }
    }
}

impl<A, T> Func<A, T>
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
        }
    }

    /// Start a new job for `args`.
    pub fn call(&self, args: A) -> Job<T> {
        self.stream.launch(self.producer.prepare(args))
    }

    /// Receive every state change of this wrapper's jobs.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RequestState<T>) + Send + Sync + 'static,
    {
        self.stream.subscribe(listener)
    }
}
