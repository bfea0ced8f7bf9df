// crates/core/src/config.rs
//! Job construction options.

use std::borrow::Cow;

/// Options applied to every job built with them.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Label recorded on each job's tracing span.
    pub label: Cow<'static, str>,
    /// Swallow body panics once they have failed the job. When false the
    /// panic is resumed after the job settles, so the task still reports it.
    pub catch_panics: bool,
}

impl JobsConfig {
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("job"),
            catch_panics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::error::JobError;
    use crate::job::Job;

    #[test]
    fn test_default_config() {
        let config = JobsConfig::default();
        assert_eq!(config.label, "job");
        assert!(config.catch_panics);
    }

    #[tokio::test]
    async fn test_uncaught_panic_still_settles_the_job() {
        let config = JobsConfig::default()
            .with_label("fragile")
            .with_catch_panics(false);
        let job: Job<()> = Job::from_body_with(
            &config,
            Body::future(async { panic!("resumed") }),
        );
        let err = job.wait().await.unwrap_err();
        assert!(matches!(err, JobError::Panicked { .. }));
    }
}
