//! Persistence of the monitoring results.
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::WrappedRcRefCell;
use crate::monitor::probe::RemoteStatus;
use crate::{JobId, Map};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Queued,
    Running,
    Paused,
    Cancelled,
    Finished,
    Failed,
}

impl Display for JobPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobPhase::Queued => "QUEUED",
            JobPhase::Running => "RUNNING",
            JobPhase::Paused => "PAUSED",
            JobPhase::Cancelled => "CANCELLED",
            JobPhase::Finished => "FINISHED",
            JobPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Final result of a job, decided by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Finished,
    /// The job failed, its outputs are still archived.
    Failed,
    /// The job failed or its remote state is unknown, archiving is skipped.
    FailedSkipArchive,
}

impl JobOutcome {
    pub fn phase(self) -> JobPhase {
        match self {
            JobOutcome::Finished => JobPhase::Finished,
            JobOutcome::Failed | JobOutcome::FailedSkipArchive => JobPhase::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorBookkeeping {
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_remote_status: Option<RemoteStatus>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    /// Code of the reason why the monitoring policy gave up.
    pub policy_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub phase: JobPhase,
    pub phase_reason: Option<String>,
    pub outcome: Option<JobOutcome>,
    pub exit_code: Option<String>,
    pub bookkeeping: MonitorBookkeeping,
}

impl JobRecord {
    pub fn new(id: JobId, phase: JobPhase) -> Self {
        Self {
            id,
            phase,
            phase_reason: None,
            outcome: None,
            exit_code: None,
            bookkeeping: Default::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} does not exist")]
    UnknownJob(JobId),
    #[error("job store is not available: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage of job state shared by all monitors.
///
/// Each operation is atomic with respect to a single job.
pub trait JobStore {
    fn record_poll_attempt(&self, job_id: JobId, success: bool) -> StoreResult<()>;

    /// Sets the outcome of a job, unless it has already been set.
    /// Returns `false` if the job already had an outcome.
    fn set_outcome(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        exit_code: Option<&str>,
    ) -> StoreResult<bool>;

    fn outcome(&self, job_id: JobId) -> StoreResult<Option<JobOutcome>>;

    fn set_phase(&self, job_id: JobId, phase: JobPhase, reason: &str) -> StoreResult<()>;

    /// Reads and modifies monitoring bookkeeping of a job in one step.
    fn update_bookkeeping(
        &self,
        job_id: JobId,
        update: &mut dyn FnMut(&mut MonitorBookkeeping),
    ) -> StoreResult<()>;

    fn bookkeeping(&self, job_id: JobId) -> StoreResult<MonitorBookkeeping>;

    /// Returns the number of successful and failed poll attempts.
    fn poll_counts(&self, job_id: JobId) -> StoreResult<(u64, u64)> {
        let bookkeeping = self.bookkeeping(job_id)?;
        Ok((bookkeeping.successful_polls, bookkeeping.failed_polls))
    }
}

/// Job store kept in memory of the current process.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: WrappedRcRefCell<Map<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn add_job(&self, job_id: JobId, phase: JobPhase) {
        self.jobs
            .get_mut()
            .insert(job_id, JobRecord::new(job_id, phase));
    }

    pub fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.jobs.get().get(&job_id).cloned()
    }

    fn with_job<R>(&self, job_id: JobId, f: impl FnOnce(&mut JobRecord) -> R) -> StoreResult<R> {
        let mut jobs = self.jobs.get_mut();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::UnknownJob(job_id))?;
        Ok(f(job))
    }
}

impl JobStore for MemoryJobStore {
    fn record_poll_attempt(&self, job_id: JobId, success: bool) -> StoreResult<()> {
        self.with_job(job_id, |job| {
            let bookkeeping = &mut job.bookkeeping;
            if success {
                bookkeeping.successful_polls += 1;
            } else {
                bookkeeping.failed_polls += 1;
            }
            bookkeeping.last_poll_at = Some(Utc::now());
        })
    }

    fn set_outcome(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        exit_code: Option<&str>,
    ) -> StoreResult<bool> {
        self.with_job(job_id, |job| match job.outcome {
            Some(existing) => {
                log::warn!(
                    "Job {job_id} already has outcome {existing:?}, ignoring outcome {outcome:?}"
                );
                false
            }
            None => {
                job.outcome = Some(outcome);
                job.exit_code = exit_code.map(|code| code.to_string());
                true
            }
        })
    }

    fn outcome(&self, job_id: JobId) -> StoreResult<Option<JobOutcome>> {
        self.with_job(job_id, |job| job.outcome)
    }

    fn set_phase(&self, job_id: JobId, phase: JobPhase, reason: &str) -> StoreResult<()> {
        self.with_job(job_id, |job| {
            log::debug!("Job {job_id} changed phase {} -> {phase}", job.phase);
            job.phase = phase;
            job.phase_reason = Some(reason.to_string());
        })
    }

    fn update_bookkeeping(
        &self,
        job_id: JobId,
        update: &mut dyn FnMut(&mut MonitorBookkeeping),
    ) -> StoreResult<()> {
        self.with_job(job_id, |job| update(&mut job.bookkeeping))
    }

    fn bookkeeping(&self, job_id: JobId) -> StoreResult<MonitorBookkeeping> {
        self.with_job(job_id, |job| job.bookkeeping.clone())
    }
}
