// crates/combinators/src/throttle.rs
//! At most one new job per window; calls inside the window share it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobtree_core::{Body, Job, JobsConfig, Subscription};
use tokio::time::Instant;

use crate::lock;
use crate::producer::Producer;
use crate::stream::{RequestState, StateStream};

struct Window<T> {
    started: Instant,
    job: Job<T>,
}

pub struct Throttle<A, T> {
    producer: Arc<Producer<A, T>>,
    stream: StateStream<T>,
    window: Duration,
    last: Arc<Mutex<Option<Window<T>>>>,
}

impl<A, T> Clone for Throttle<A, T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            stream: self.stream.clone(),
            window: self.window,
            last: Arc::clone(&self.last),
        }
    }
}

impl<A, T> Throttle<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `f`, starting at most one job per `window`.
    pub fn new<F>(config: JobsConfig, window: Duration, f: F) -> Self
    where
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(Producer::new(config, f)),
            stream: StateStream::new(),
            window,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a job unless one was started less than `window` ago, in which
    /// case that job is returned and `args` are dropped.
    pub fn call(&self, args: A) -> Job<T> {
        let now = Instant::now();
        let unstarted = {
            let mut last = lock(&self.last);
            if let Some(open) = last.as_ref() {
                if now.duration_since(open.started) < self.window {
                    tracing::trace!(job_id = open.job.id(), "throttled call reuses job");
                    return open.job.clone();
                }
            }
            let unstarted = self.producer.prepare(args);
            *last = Some(Window {
                started: now,
                job: unstarted.job().clone(),
            });
            unstarted
        };
        self.stream.launch(unstarted)
    }

    /// Minimum time between two new jobs.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Receive every state change of this wrapper's jobs.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RequestState<T>) + Send + Sync + 'static,
    {
        self.stream.subscribe(listener)
    }
}
