use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::config::{MonitorConfig, PollStep};

/// Why the policy gave up on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyReason {
    TooManyFailures,
    TimeExpired,
}

impl PolicyReason {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyReason::TooManyFailures => "TOO_MANY_FAILURES",
            PolicyReason::TimeExpired => "TIME_EXPIRED",
        }
    }
}

impl Display for PolicyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            PolicyReason::TooManyFailures => "too many consecutive failed status checks",
            PolicyReason::TimeExpired => "maximum monitoring time expired",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Wait(Duration),
    Terminate(PolicyReason),
}

/// Decides how often a job is polled and when monitoring gives up.
pub trait MonitorPolicy {
    /// Returns how long to wait before the next status check.
    fn millis_to_wait(&mut self, last_attempt_failed: bool) -> PolicyDecision;

    /// Whether the remote connection stays open between status checks.
    fn keep_connection(&self) -> bool;

    /// Whether a status check that found no trace of the job should be repeated without being
    /// counted as a failure. The job may simply not be registered by the remote system yet.
    fn retry_for_initial_queuing(&mut self) -> bool;
}

/// Polls often at first and less frequently as time goes on.
pub struct StepwisePolicy {
    steps: Vec<PollStep>,
    step_index: usize,
    polls_in_step: u32,
    started_at: Instant,
    max_elapsed: Duration,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    initial_queuing_retries: u32,
    keep_connection: bool,
}

impl StepwisePolicy {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            step_index: 0,
            polls_in_step: 0,
            started_at: Instant::now(),
            max_elapsed: config.max_elapsed,
            consecutive_failures: 0,
            max_consecutive_failures: config.max_consecutive_failures,
            initial_queuing_retries: config.initial_queuing_retries,
            keep_connection: config.keep_connection,
        }
    }

    fn next_interval(&mut self) -> Duration {
        // The last step is used indefinitely
        while self.step_index + 1 < self.steps.len() {
            let step = &self.steps[self.step_index];
            match step.polls {
                Some(polls) if self.polls_in_step >= polls => {
                    self.step_index += 1;
                    self.polls_in_step = 0;
                }
                _ => break,
            }
        }
        self.polls_in_step += 1;
        self.steps
            .get(self.step_index)
            .map(|step| step.interval)
            .unwrap_or(Duration::from_secs(60))
    }
}

impl MonitorPolicy for StepwisePolicy {
    fn millis_to_wait(&mut self, last_attempt_failed: bool) -> PolicyDecision {
        if last_attempt_failed {
            self.consecutive_failures += 1;
            if self.consecutive_failures > self.max_consecutive_failures {
                return PolicyDecision::Terminate(PolicyReason::TooManyFailures);
            }
        } else {
            self.consecutive_failures = 0;
        }
        if self.started_at.elapsed() >= self.max_elapsed {
            return PolicyDecision::Terminate(PolicyReason::TimeExpired);
        }
        PolicyDecision::Wait(self.next_interval())
    }

    fn keep_connection(&self) -> bool {
        self.keep_connection
    }

    fn retry_for_initial_queuing(&mut self) -> bool {
        if self.initial_queuing_retries > 0 {
            self.initial_queuing_retries -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::common::config::{MonitorConfig, PollStep};
    use crate::monitor::policy::{MonitorPolicy, PolicyDecision, PolicyReason, StepwisePolicy};

    fn config() -> MonitorConfig {
        MonitorConfig {
            steps: vec![
                PollStep::new(Some(2), Duration::from_secs(1)),
                PollStep::new(Some(1), Duration::from_secs(5)),
                PollStep::new(None, Duration::from_secs(30)),
            ],
            max_elapsed: Duration::from_secs(3600),
            max_consecutive_failures: 2,
            initial_queuing_retries: 1,
            keep_connection: false,
        }
    }

    fn wait(policy: &mut StepwisePolicy, failed: bool) -> u64 {
        match policy.millis_to_wait(failed) {
            PolicyDecision::Wait(duration) => duration.as_secs(),
            PolicyDecision::Terminate(reason) => panic!("Unexpected termination: {reason}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn steps_lengthen() {
        let mut policy = StepwisePolicy::new(&config());
        let waits: Vec<u64> = (0..6).map(|_| wait(&mut policy, false)).collect();
        assert_eq!(waits, vec![1, 1, 5, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_failures() {
        let mut policy = StepwisePolicy::new(&config());
        wait(&mut policy, true);
        wait(&mut policy, true);
        assert_eq!(
            policy.millis_to_wait(true),
            PolicyDecision::Terminate(PolicyReason::TooManyFailures)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failures() {
        let mut policy = StepwisePolicy::new(&config());
        wait(&mut policy, true);
        wait(&mut policy, true);
        wait(&mut policy, false);
        wait(&mut policy, true);
        wait(&mut policy, true);
    }

    #[tokio::test(start_paused = true)]
    async fn time_expired() {
        let mut policy = StepwisePolicy::new(&config());
        wait(&mut policy, false);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(
            policy.millis_to_wait(false),
            PolicyDecision::Terminate(PolicyReason::TimeExpired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initial_queuing_retries() {
        let mut policy = StepwisePolicy::new(&config());
        assert!(policy.retry_for_initial_queuing());
        assert!(!policy.retry_for_initial_queuing());
        assert!(!policy.keep_connection());
    }
}
