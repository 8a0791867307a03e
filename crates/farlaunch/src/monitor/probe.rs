use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::monitor::error::MonitorResult;
use crate::monitor::remote::RemoteSession;

/// Status of a job as observed on the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    /// The status command or the connection failed.
    Null,
    /// The remote system does not know the job (yet).
    Empty,
    Queued,
    Active,
    Done,
    Failed,
}

impl RemoteStatus {
    /// Whether the status says something about the job.
    pub fn has_data(self) -> bool {
        !matches!(self, RemoteStatus::Null | RemoteStatus::Empty)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteStatus::Done | RemoteStatus::Failed)
    }
}

impl Display for RemoteStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteStatus::Null => "NULL",
            RemoteStatus::Empty => "EMPTY",
            RemoteStatus::Queued => "QUEUED",
            RemoteStatus::Active => "ACTIVE",
            RemoteStatus::Done => "DONE",
            RemoteStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = MonitorResult<T>> + 'a>>;

/// Queries the status of one job on one kind of execution technology.
pub trait RemoteStatusProbe {
    /// Queries the remote job.
    ///
    /// `active` selects the query used while the job is expected to be queued or running.
    /// The inactive query looks for traces of a job that has already ended.
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        active: bool,
    ) -> ProbeFuture<'a, RemoteStatus>;

    /// Return code of the application, as far as it is known.
    fn exit_code(&self) -> String {
        "0".to_string()
    }

    /// Releases remote resources held by the job when monitoring ends.
    fn clean_up_remote_job<'a>(&'a mut self, _session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move { Ok(()) })
    }

    /// Stops the remote job.
    fn kill_remote_job<'a>(&'a mut self, session: &'a mut RemoteSession) -> ProbeFuture<'a, ()>;

    /// Description of the monitored job, used in log messages.
    fn describe(&self) -> String;
}
