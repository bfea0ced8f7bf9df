// crates/cli/src/scenarios.rs
//! Scenarios the CLI can run. Each returns a serializable [`Report`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobtree_combinators::{Jobs, RequestState};
use jobtree_core::steps::{from_fn, Operation, Step};
use jobtree_core::{Body, Job, JobError, JobId, JobState, JobsConfig};
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Coalescing {
    Func,
    Latest,
    Throttle,
    Debounce,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticks: Option<usize>,
}

impl JobSummary {
    fn of<T>(job: &Job<T>, ticks: Option<usize>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            id: job.id(),
            state: job.state(),
            ticks,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: String,
    pub jobs: Vec<JobSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<Value>,
    /// Bodies that actually started running.
    pub ran: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
}

/// A parent with `children` ticking children, cancelled after `cancel_after`.
pub async fn tree(config: &JobsConfig, children: usize, tick: Duration, cancel_after: Duration) -> Report {
    let jobs = Jobs::new(config.clone());
    let started: Arc<Mutex<Vec<(Job<()>, Arc<AtomicUsize>)>>> = Arc::default();

    let recorded = Arc::clone(&started);
    let spawner = jobs.clone();
    let parent: Job<()> = jobs.spawn(move |_ctx| async move {
        let handles: Vec<Job<()>> = (0..children)
            .map(|_| {
                let ticks = Arc::new(AtomicUsize::new(0));
                let counter = Arc::clone(&ticks);
                let child = spawner.spawn(move |ctx| async move {
                    loop {
                        ctx.check()?;
                        counter.fetch_add(1, Ordering::SeqCst);
                        sleep(tick).await;
                    }
                });
                recorded
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((child.clone(), ticks));
                child
            })
            .collect();
        for child in handles {
            child.await?;
        }
        Ok(())
    });

    sleep(cancel_after).await;
    parent.cancel_with("cancelled from the command line");
    if let Err(error) = parent.wait().await {
        tracing::info!(job_id = parent.id(), %error, "parent settled");
    }

    let started = started
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut summaries = vec![JobSummary::of(&parent, None)];
    summaries.extend(
        started
            .iter()
            .map(|(child, ticks)| JobSummary::of(child, Some(ticks.load(Ordering::SeqCst)))),
    );
    Report {
        scenario: "tree".to_string(),
        ran: started.len() + 1,
        jobs: summaries,
        stream: Vec::new(),
        value: None,
    }
}

fn slow(n: u32, work: Duration) -> Body<u32> {
    let wait = Operation::new(move |_| async move {
        sleep(work).await;
        Ok(Value::Null)
    });
    let mut waited = false;
    Body::steps(from_fn(move |_| {
        if waited {
            return Ok(Step::Complete(n));
        }
        waited = true;
        Ok(Step::call(&wait, []))
    }))
}

/// Make `calls` calls, `gap` apart, through the chosen wrapper.
pub async fn calls(
    config: &JobsConfig,
    policy: Coalescing,
    calls: u32,
    gap: Duration,
    window: Duration,
    work: Duration,
) -> anyhow::Result<Report> {
    let jobs = Jobs::new(config.clone());
    let ran = Arc::new(AtomicUsize::new(0));
    let stream = Arc::new(Mutex::new(Vec::new()));

    let counter = Arc::clone(&ran);
    let f = move |n: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        slow(n, work)
    };
    let sink = Arc::clone(&stream);
    let record = move |state: &RequestState<u32>| match serde_json::to_value(state) {
        Ok(value) => sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(value),
        Err(error) => tracing::warn!(%error, "state not serializable"),
    };

    let mut handles: Vec<Job<u32>> = Vec::new();
    match policy {
        Coalescing::Func => {
            let wrapper = jobs.func(f);
            wrapper.subscribe(record);
            for n in 0..calls {
                handles.push(wrapper.call(n));
                sleep(gap).await;
            }
        }
        Coalescing::Latest => {
            let wrapper = jobs.latest(f);
            wrapper.subscribe(record);
            for n in 0..calls {
                handles.push(wrapper.call(n));
                sleep(gap).await;
            }
        }
        Coalescing::Throttle => {
            let wrapper = jobs.throttle(window, f);
            wrapper.subscribe(record);
            for n in 0..calls {
                handles.push(wrapper.call(n));
                sleep(gap).await;
            }
        }
        Coalescing::Debounce => {
            let wrapper = jobs.debounce(window, f);
            wrapper.subscribe(record);
            for n in 0..calls {
                handles.extend(wrapper.call(n));
                sleep(gap).await;
            }
            sleep(window).await;
            handles.extend(wrapper.last());
        }
    }
    handles.dedup_by_key(|job| job.id());

    let mut value = None;
    for job in &handles {
        match job.wait().await {
            Ok(n) => value = Some(n),
            Err(JobError::Cancelled(_)) => value = None,
            Err(error) => return Err(error.into()),
        }
    }

    let stream = std::mem::take(
        &mut *stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    );
    Ok(Report {
        scenario: format!("{policy:?}").to_lowercase(),
        jobs: handles.iter().map(|job| JobSummary::of(job, None)).collect(),
        stream,
        ran: ran.load(Ordering::SeqCst),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn kinds(report: &Report) -> Vec<&str> {
        report
            .stream
            .iter()
            .filter_map(|state| state["state"].as_str())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tree_cancels_every_child() {
        let report = tree(&JobsConfig::default(), 2, ms(10), ms(35)).await;
        assert_eq!(report.jobs.len(), 3);
        for job in &report.jobs {
            assert_eq!(job.state, JobState::Cancelled);
        }
        let ticks: Vec<_> = report.jobs[1..].iter().map(|job| job.ticks).collect();
        assert_eq!(ticks, vec![Some(4), Some(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_keeps_only_the_last_call() {
        let report = calls(&JobsConfig::default(), Coalescing::Latest, 3, ms(10), ms(50), ms(30))
            .await
            .unwrap();
        assert_eq!(
            kinds(&report),
            vec!["loading", "cancelled", "loading", "cancelled", "loading", "hasValue"]
        );
        assert_eq!(report.value, Some(2));
        assert_eq!(report.ran, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_starts_one_job_per_window() {
        let report = calls(&JobsConfig::default(), Coalescing::Throttle, 5, ms(20), ms(50), ms(30))
            .await
            .unwrap();
        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.ran, 2);
        assert_eq!(report.value, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_runs_once_with_last_args() {
        let report = calls(&JobsConfig::default(), Coalescing::Debounce, 5, ms(20), ms(50), ms(30))
            .await
            .unwrap();
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.value, Some(4));
        assert_eq!(kinds(&report), vec!["loading", "hasValue"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes_compactly() {
        let report = calls(&JobsConfig::default(), Coalescing::Func, 1, ms(1), ms(1), ms(1))
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenario"], "func");
        assert_eq!(json["jobs"][0]["state"], "succeeded");
        assert!(json["jobs"][0].get("ticks").is_none());
        assert_eq!(json["value"], 0);
    }
}
