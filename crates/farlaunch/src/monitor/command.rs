//! Commands delivered to a running monitor from the outside.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::JobId;
use crate::common::rpc::{ResponseToken, RpcReceiver, RpcSender, initiate_request, make_rpc_queue};
use crate::monitor::probe::RemoteStatus;
use crate::monitor::process::MonitorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    Status,
    Pause,
    Cancel,
}

/// Snapshot of a monitored job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub state: MonitorState,
    pub last_status: Option<RemoteStatus>,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum JobCommand {
    Status(ResponseToken<StatusReport>),
    /// Stop monitoring, the remote job keeps running.
    Pause,
    /// Stop the remote job and end monitoring.
    Cancel,
}

impl JobCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            JobCommand::Status(_) => CommandKind::Status,
            JobCommand::Pause => CommandKind::Pause,
            JobCommand::Cancel => CommandKind::Cancel,
        }
    }
}

#[derive(Clone)]
pub struct CommandSender {
    sender: RpcSender<JobCommand>,
}

impl CommandSender {
    fn send(&self, command: JobCommand) {
        if let Err(error) = self.sender.send(command) {
            log::debug!("Monitor is not running anymore, dropping {:?}", error.0.kind());
        }
    }

    pub fn cancel(&self) {
        self.send(JobCommand::Cancel);
    }

    pub fn pause(&self) {
        self.send(JobCommand::Pause);
    }

    /// Answered while the monitor waits between polls, without an extra remote query.
    pub fn request_status(&self) -> oneshot::Receiver<StatusReport> {
        initiate_request(|token| self.sender.send(JobCommand::Status(token)))
    }
}

pub struct CommandReceiver {
    receiver: RpcReceiver<JobCommand>,
    closed: bool,
}

impl CommandReceiver {
    /// Returns the next command without waiting.
    pub fn try_next(&mut self) -> Option<JobCommand> {
        if self.closed {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Waits until the deadline or until a command arrives.
    /// Returns the command, or `None` when the deadline was reached.
    pub async fn sleep_until(&mut self, deadline: Instant) -> Option<JobCommand> {
        tokio::select! {
            command = self.receiver.recv(), if !self.closed => {
                if command.is_none() {
                    self.closed = true;
                    tokio::time::sleep_until(deadline).await;
                }
                command
            }
            _ = tokio::time::sleep_until(deadline) => None,
        }
    }
}

pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = make_rpc_queue();
    (
        CommandSender { sender },
        CommandReceiver {
            receiver,
            closed: false,
        },
    )
}
