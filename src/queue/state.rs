use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::job::{Job, JobState};
use crate::adapter::AdapterResult;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total dispatches allowed before a job is marked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for the backoff delay before jitter.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the computed delay, in `[0, 1]`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt using capped exponential backoff.
    /// delay = min(base_delay_ms * 2^(attempt - 1), max_delay_ms)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Full backoff for a failed attempt: capped delay, raised to any retry-after
    /// hint, plus jitter.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = Duration::from_millis(self.delay_for_attempt(attempt));
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        if self.jitter_ratio > 0.0 {
            let max_jitter = delay.as_secs_f64() * self.jitter_ratio.min(1.0);
            let jitter = rand::rng().random_range(0.0..=max_jitter);
            delay += Duration::from_secs_f64(jitter);
        }
        delay
    }
}

/// The result of recording an adapter outcome against a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job finished successfully.
    Succeeded { partial: bool },
    /// The job failed but has budget left; it becomes claimable after `delay`.
    Retry { delay: Duration, reason: String },
    /// The job failed terminally.
    Failed { reason: String },
}

/// Drives a `Job` through its lifecycle.
pub struct StateMachine;

impl StateMachine {
    /// `pending | retrying → running`. Every dispatch counts as one attempt.
    pub fn start(job: &mut Job) {
        job.state = JobState::Running;
        job.attempts += 1;
        job.next_attempt_at = None;
        job.touch();
    }

    /// Compute and apply the transition for a running job given the adapter result.
    ///
    /// - Success (partial or not) moves to `succeeded`.
    /// - Retryable failures move to `retrying` while `attempts < max_attempts`.
    /// - Non-retryable failures, or an exhausted budget, move to `failed`.
    pub fn complete(job: &mut Job, result: &AdapterResult, retry: &RetryConfig) -> Transition {
        let transition = match &result.error {
            None if result.success => Transition::Succeeded {
                partial: result.partial,
            },
            None => Transition::Failed {
                reason: "adapter reported failure without an error".to_string(),
            },
            Some(err) if err.is_retryable() && job.attempts < retry.max_attempts => {
                Transition::Retry {
                    delay: retry.backoff(job.attempts, err.retry_after()),
                    reason: err.to_string(),
                }
            }
            Some(err) => Transition::Failed {
                reason: err.to_string(),
            },
        };

        match &transition {
            Transition::Succeeded { partial } => {
                job.state = JobState::Succeeded;
                job.partial = *partial;
                job.last_error = None;
                job.next_attempt_at = None;
            }
            Transition::Retry { delay, reason } => {
                job.state = JobState::Retrying;
                job.last_error = Some(reason.clone());
                job.next_attempt_at = chrono::Duration::from_std(*delay)
                    .ok()
                    .map(|d| Utc::now() + d);
            }
            Transition::Failed { reason } => {
                job.state = JobState::Failed;
                job.last_error = Some(reason.clone());
                job.next_attempt_at = None;
            }
        }
        job.touch();

        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;
    use crate::queue::job::{JobAction, Target};

    fn make_job() -> Job {
        Job::new(Target::parse("note-A").unwrap(), JobAction::ExtractQuotes)
    }

    fn no_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = no_jitter(5);
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_delay_ms: 5000,
            ..no_jitter(10)
        };
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 5000);
        assert_eq!(config.delay_for_attempt(60), 5000);
        assert_eq!(config.delay_for_attempt(u32::MAX), 5000);
    }

    #[test]
    fn backoff_honors_retry_after_hint() {
        let config = no_jitter(3);
        let delay = config.backoff(1, Some(Duration::from_secs(30)));
        assert_eq!(delay, Duration::from_secs(30));
        let delay = config.backoff(1, Some(Duration::from_millis(10)));
        assert_eq!(delay, Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let config = RetryConfig {
            jitter_ratio: 0.5,
            ..no_jitter(3)
        };
        for _ in 0..50 {
            let delay = config.backoff(2, None);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn start_counts_an_attempt() {
        let mut job = make_job();
        StateMachine::start(&mut job);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn success_does_not_touch_attempts() {
        let mut job = make_job();
        StateMachine::start(&mut job);
        let t = StateMachine::complete(&mut job, &AdapterResult::ok(serde_json::json!({})), &no_jitter(3));
        assert_eq!(t, Transition::Succeeded { partial: false });
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn retryable_failure_retries_then_fails() {
        let mut job = make_job();
        let retry = no_jitter(2);
        let unavailable = AdapterResult::failure(AdapterError::ExternalServiceUnavailable(
            "connection refused".into(),
        ));

        StateMachine::start(&mut job);
        let t = StateMachine::complete(&mut job, &unavailable, &retry);
        assert!(matches!(t, Transition::Retry { .. }));
        assert_eq!(job.state, JobState::Retrying);
        assert!(job.next_attempt_at.is_some());

        StateMachine::start(&mut job);
        let t = StateMachine::complete(&mut job, &unavailable, &retry);
        assert!(matches!(t, Transition::Failed { .. }));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.last_error.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn malformed_target_fails_immediately() {
        let mut job = make_job();
        StateMachine::start(&mut job);
        let t = StateMachine::complete(
            &mut job,
            &AdapterResult::failure(AdapterError::MalformedTarget("no video link".into())),
            &no_jitter(5),
        );
        assert!(matches!(t, Transition::Failed { .. }));
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn partial_result_is_success_with_flag() {
        let mut job = make_job();
        StateMachine::start(&mut job);
        let t = StateMachine::complete(
            &mut job,
            &AdapterResult::partial(serde_json::json!({"quotes": []})),
            &no_jitter(3),
        );
        assert_eq!(t, Transition::Succeeded { partial: true });
        assert!(job.partial);
    }

    #[test]
    fn rate_limited_uses_hint_for_delay() {
        let mut job = make_job();
        StateMachine::start(&mut job);
        let t = StateMachine::complete(
            &mut job,
            &AdapterResult::failure(AdapterError::RateLimited {
                message: "slow down".into(),
                retry_after: Some(Duration::from_secs(20)),
            }),
            &no_jitter(3),
        );
        match t {
            Transition::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(20)),
            other => panic!("expected retry, got {other:?}"),
        }
    }
}
