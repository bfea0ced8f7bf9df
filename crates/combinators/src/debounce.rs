// crates/combinators/src/debounce.rs
//! Create a job only once calls have stopped arriving for a whole window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobtree_core::{scope, Body, Job, JobsConfig, Subscription};
use tokio::task::JoinHandle;

use crate::lock;
use crate::producer::Producer;
use crate::stream::{RequestState, StateStream};

struct Shared<T> {
    timer: Mutex<Option<JoinHandle<()>>>,
    last: Mutex<Option<Job<T>>>,
}

pub struct Debounce<A, T> {
    producer: Arc<Producer<A, T>>,
    stream: StateStream<T>,
    window: Duration,
    shared: Arc<Shared<T>>,
}

impl<A, T> Clone for Debounce<A, T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            stream: self.stream.clone(),
            window: self.window,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, T> Debounce<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `f`, creating a job once calls stop for `window`.
    pub fn new<F>(config: JobsConfig, window: Duration, f: F) -> Self
    where
        F: Fn(A) -> Body<T> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(Producer::new(config, f)),
            stream: StateStream::new(),
            window,
            shared: Arc::new(Shared {
                timer: Mutex::new(None),
                last: Mutex::new(None),
            }),
        }
    }

    /// Restart the timer with `args`. When it fires, a job is created as a
    /// child of whichever job made this call.
    ///
    /// Returns the job created by the most recent timer that already fired,
    /// which is never the one this call schedules.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call(&self, args: A) -> Option<Job<T>> {
        let caller = scope::current();
        let producer = Arc::clone(&self.producer);
        let stream = self.stream.clone();
        let shared = Arc::clone(&self.shared);
        let window = self.window;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let unstarted = match caller {
                Some(caller) => scope::enter(caller, || producer.prepare(args)),
                None => producer.prepare(args),
            };
            *lock(&shared.last) = Some(unstarted.job().clone());
            tracing::trace!(job_id = unstarted.job().id(), "debounce timer fired");
            stream.launch(unstarted);
        });

        if let Some(previous) = lock(&self.shared.timer).replace(timer) {
            previous.abort();
        }
        self.last()
    }

    /// The job created by the most recent timer that fired.
    pub fn last(&self) -> Option<Job<T>> {
        lock(&self.shared.last).clone()
    }

    /// Quiet time required before a job is created.
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_burst_creates_one_job_after_last_call() {
        let created = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&created);
        let debounce = Debounce::new(
            JobsConfig::default(),
            Duration::from_millis(100),
            move |n: u32| {
                seen.lock().unwrap().push((n, Instant::now()));
                Body::value(n)
            },
        );

        let start = Instant::now();
        for n in 0..4 {
            assert!(debounce.call(n).is_none());
            sleep(Duration::from_millis(30)).await;
        }
        sleep(Duration::from_millis(200)).await;

        let created = created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        let (n, at) = created[0];
        assert_eq!(n, 3);
        assert_eq!(at - start, Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_returns_job_from_fired_timer() {
        let debounce = Debounce::new(JobsConfig::default(), Duration::from_millis(50), |n: u32| {
            Body::value(n * 10)
        });
        assert!(debounce.call(1).is_none());
        sleep(Duration::from_millis(60)).await;

        let fired = debounce.call(2).expect("first timer fired");
        assert_eq!(fired.await.unwrap(), 10);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(debounce.last().unwrap().await.unwrap(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_sees_only_the_created_job() {
        let debounce = Debounce::new(JobsConfig::default(), Duration::from_millis(20), |n: u32| {
            Body::value(n)
        });
        let loading = Arc::new(AtomicUsize::new(0));
        let values = Arc::new(Mutex::new(Vec::new()));
        let (l, v) = (Arc::clone(&loading), Arc::clone(&values));
        debounce.subscribe(move |state| match state {
            RequestState::Loading => {
                l.fetch_add(1, Ordering::SeqCst);
            }
            RequestState::HasValue { value } => v.lock().unwrap().push(*value),
            _ => {}
        });

        debounce.call(1);
        debounce.call(2);
        debounce.call(3);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(loading.load(Ordering::SeqCst), 1);
        assert_eq!(*values.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_attaches_to_calling_job() {
        let debounce = Debounce::new(JobsConfig::default(), Duration::from_millis(10), |(): ()| {
            Body::future(std::future::pending::<anyhow::Result<()>>())
        });
        let inner = debounce.clone();
        let parent: Job<()> = Job::spawn(move |_ctx| async move {
            inner.call(());
            std::future::pending::<()>().await;
            Ok(())
        });

        sleep(Duration::from_millis(20)).await;
        let child = debounce.last().expect("timer fired");
        assert_eq!(child.scope().parent().map(|p| p.id()), Some(parent.id()));

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.wait().await.unwrap_err().is_cancelled());
    }
}
