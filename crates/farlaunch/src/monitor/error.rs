use thiserror::Error;

use crate::JobId;
use crate::monitor::policy::PolicyReason;
use crate::monitor::store::{JobPhase, StoreError};

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Decides what happens with the job outcome when monitoring ends with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The remote state is unknown but the job may still be monitored later.
    Recoverable,
    /// Monitoring cannot continue, the job is failed.
    Fatal,
}

/// Failures of the connection to the remote system.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel of an otherwise open connection is broken, reconnecting may help.
    #[error("remote channel error: {0}")]
    Channel(String),
    #[error("cannot connect to {0}")]
    Connect(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring of job {job_id} timed out: {reason}")]
    Timeout { job_id: JobId, reason: PolicyReason },
    #[error("job {job_id} cannot be monitored in phase {phase}")]
    InvalidPhase { job_id: JobId, phase: JobPhase },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("job store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote probe error: {0:#}")]
    Probe(anyhow::Error),
    #[error("monitoring aborted: {0}")]
    Aborted(String),
}

impl From<anyhow::Error> for MonitorError {
    fn from(error: anyhow::Error) -> Self {
        MonitorError::Probe(error)
    }
}

impl MonitorError {
    pub fn severity(&self) -> Severity {
        match self {
            MonitorError::Transport(_) => Severity::Recoverable,
            MonitorError::Store(error) if error.is_transient() => Severity::Recoverable,
            MonitorError::Timeout { .. }
            | MonitorError::InvalidPhase { .. }
            | MonitorError::Store(_)
            | MonitorError::Probe(_)
            | MonitorError::Aborted(_) => Severity::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }

    /// Stable identifier of the message, independent of the concrete job in the error.
    pub fn message_id(&self) -> &'static str {
        match self {
            MonitorError::Timeout { .. } => "monitoring timed out",
            MonitorError::InvalidPhase { .. } => "invalid monitoring phase",
            MonitorError::Transport(_) => "remote transport failure",
            MonitorError::Store(_) => "job store failure",
            MonitorError::Probe(_) => "remote probe failure",
            MonitorError::Aborted(_) => "monitoring aborted",
        }
    }
}
