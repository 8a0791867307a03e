use std::rc::Rc;

use serde::Serialize;
use tokio::time::Instant;

use crate::JobId;
use crate::monitor::command::{CommandKind, CommandReceiver, JobCommand, StatusReport};
use crate::monitor::error::{MonitorError, MonitorResult, Severity};
use crate::monitor::policy::{MonitorPolicy, PolicyDecision};
use crate::monitor::probe::{RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::RemoteSession;
use crate::monitor::store::{JobOutcome, JobPhase, JobStore};

/// What the monitor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    /// The job is queued, monitoring ends when it starts running.
    WaitQueued,
    /// The job is running, monitoring ends when it ends.
    WaitRunning,
}

impl MonitorState {
    fn from_phase(job_id: JobId, phase: JobPhase) -> MonitorResult<Self> {
        match phase {
            JobPhase::Queued => Ok(MonitorState::WaitQueued),
            JobPhase::Running => Ok(MonitorState::WaitRunning),
            phase => Err(MonitorError::InvalidPhase { job_id, phase }),
        }
    }
}

/// How a monitoring session ended, if it did not end with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorExit {
    /// The job went from queued to running, it should be monitored again in the running phase.
    Advanced,
    Finished,
    Failed,
    /// Monitoring was stopped by a command.
    Interrupted(CommandKind),
}

#[derive(Debug, Clone, Copy)]
pub struct MonitoredJob {
    pub id: JobId,
    /// Outputs of a failed job are archived.
    pub archive_on_error: bool,
}

/// Watches a single job on a remote system until it leaves its current phase.
pub struct RemoteMonitor {
    job: MonitoredJob,
    probe: Box<dyn RemoteStatusProbe>,
    session: RemoteSession,
    policy: Box<dyn MonitorPolicy>,
    store: Rc<dyn JobStore>,
    commands: CommandReceiver,
    last_attempt_failed: bool,
    last_status: Option<RemoteStatus>,
}

impl RemoteMonitor {
    pub fn new(
        job: MonitoredJob,
        probe: Box<dyn RemoteStatusProbe>,
        session: RemoteSession,
        policy: Box<dyn MonitorPolicy>,
        store: Rc<dyn JobStore>,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            job,
            probe,
            session,
            policy,
            store,
            commands,
            last_attempt_failed: false,
            last_status: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// Monitors the job until it finishes, following it from the queued to the running phase.
    pub async fn run(&mut self, phase: JobPhase) -> MonitorResult<MonitorExit> {
        let mut phase = phase;
        loop {
            match self.monitor(phase).await? {
                MonitorExit::Advanced => phase = JobPhase::Running,
                exit => return Ok(exit),
            }
        }
    }

    /// Runs one monitoring session, starting in the given phase.
    ///
    /// When the session ends with a fatal error, the job is failed if it does not have an outcome
    /// yet. Recoverable errors leave the outcome unset so that monitoring can be resumed later.
    pub async fn monitor(&mut self, phase: JobPhase) -> MonitorResult<MonitorExit> {
        let state = MonitorState::from_phase(self.job.id, phase)?;
        log::info!(
            "Monitoring {} (job {}) on {} in state {state:?}",
            self.probe.describe(),
            self.job.id,
            self.session.host()
        );
        self.last_attempt_failed = false;

        let result = self.poll_loop(state).await;
        self.finish_session(state, &result).await;
        match &result {
            Ok(exit) => log::info!("Monitoring of job {} ended: {exit:?}", self.job.id),
            Err(error) => log::error!("Monitoring of job {} failed: {error}", self.job.id),
        }
        result
    }

    async fn poll_loop(&mut self, state: MonitorState) -> MonitorResult<MonitorExit> {
        let job_id = self.job.id;
        loop {
            let wait = match self.policy.millis_to_wait(self.last_attempt_failed) {
                PolicyDecision::Wait(duration) => duration,
                PolicyDecision::Terminate(reason) => {
                    let message = format!("Monitoring of {} stopped: {reason}", self.probe.describe());
                    log::warn!("{message} (job {job_id})");
                    // The job may still be running, so its outputs are not archived
                    let committed =
                        self.store
                            .set_outcome(job_id, JobOutcome::FailedSkipArchive, None)?;
                    self.store.update_bookkeeping(job_id, &mut |bookkeeping| {
                        bookkeeping.policy_reason = Some(reason.code().to_string());
                        bookkeeping.last_message = Some(message.clone());
                    })?;
                    if committed {
                        self.store.set_phase(job_id, JobPhase::Failed, &message)?;
                    }
                    return Err(MonitorError::Timeout { job_id, reason });
                }
            };

            if let Some(exit) = self.handle_commands(state).await? {
                return Ok(exit);
            }
            let deadline = Instant::now() + wait;
            while let Some(command) = self.commands.sleep_until(deadline).await {
                if let Some(exit) = self.handle_command(state, command).await? {
                    return Ok(exit);
                }
            }
            if let Some(exit) = self.handle_commands(state).await? {
                return Ok(exit);
            }

            let mut status = self
                .probe
                .query_remote_job(&mut self.session, true)
                .await?;
            if !status.has_data() {
                status = self
                    .probe
                    .query_remote_job(&mut self.session, false)
                    .await?;
            }
            if !self.policy.keep_connection() {
                self.session.close().await;
            }
            log::debug!("Job {job_id} has remote status {status}");
            self.last_status = Some(status);

            if !status.has_data() {
                if self.policy.retry_for_initial_queuing() {
                    log::debug!("Job {job_id} is not visible on the remote system yet, retrying");
                    self.last_attempt_failed = false;
                } else {
                    self.store.record_poll_attempt(job_id, false)?;
                    self.checkpoint(status)?;
                    self.last_attempt_failed = true;
                }
                continue;
            }

            self.store.record_poll_attempt(job_id, true)?;
            self.checkpoint(status)?;
            self.last_attempt_failed = false;

            match status {
                RemoteStatus::Active if state == MonitorState::WaitQueued => {
                    self.store
                        .set_phase(job_id, JobPhase::Running, "Job started on the remote system")?;
                    return Ok(MonitorExit::Advanced);
                }
                RemoteStatus::Done => {
                    self.commit_outcome(JobOutcome::Finished, "Job finished")?;
                    return Ok(MonitorExit::Finished);
                }
                RemoteStatus::Failed => {
                    let outcome = if self.job.archive_on_error {
                        JobOutcome::Failed
                    } else {
                        JobOutcome::FailedSkipArchive
                    };
                    self.commit_outcome(outcome, "Job failed on the remote system")?;
                    return Ok(MonitorExit::Failed);
                }
                RemoteStatus::Queued if state == MonitorState::WaitRunning => {
                    log::warn!("Running job {job_id} was requeued on the remote system");
                }
                _ => {}
            }
        }
    }

    fn checkpoint(&self, status: RemoteStatus) -> MonitorResult<()> {
        self.store.update_bookkeeping(self.job.id, &mut |bookkeeping| {
            bookkeeping.last_remote_status = Some(status);
        })?;
        Ok(())
    }

    fn commit_outcome(&self, outcome: JobOutcome, message: &str) -> MonitorResult<()> {
        let exit_code = self.probe.exit_code();
        let message = format!("{message} with exit code {exit_code}");
        log::info!("Job {}: {message}", self.job.id);
        if !self
            .store
            .set_outcome(self.job.id, outcome, Some(&exit_code))?
        {
            // Phase and message belong to the outcome that was committed first
            return Ok(());
        }
        self.store.update_bookkeeping(self.job.id, &mut |bookkeeping| {
            bookkeeping.last_message = Some(message.clone());
        })?;
        self.store.set_phase(self.job.id, outcome.phase(), &message)?;
        Ok(())
    }

    /// Handles all pending commands.
    /// Returns the exit of the session if a command ended it.
    async fn handle_commands(&mut self, state: MonitorState) -> MonitorResult<Option<MonitorExit>> {
        while let Some(command) = self.commands.try_next() {
            if let Some(exit) = self.handle_command(state, command).await? {
                return Ok(Some(exit));
            }
        }
        Ok(None)
    }

    /// Status requests are answered without touching the remote system.
    /// Pause and cancel end the session.
    async fn handle_command(
        &mut self,
        state: MonitorState,
        command: JobCommand,
    ) -> MonitorResult<Option<MonitorExit>> {
        let job_id = self.job.id;
        match command {
            JobCommand::Status(token) => {
                let bookkeeping = self.store.bookkeeping(job_id)?;
                token.respond(StatusReport {
                    job_id,
                    state,
                    last_status: self.last_status,
                    successful_polls: bookkeeping.successful_polls,
                    failed_polls: bookkeeping.failed_polls,
                    last_poll_at: bookkeeping.last_poll_at,
                });
                Ok(None)
            }
            JobCommand::Pause => {
                log::info!("Monitoring of job {job_id} paused");
                self.store
                    .set_phase(job_id, JobPhase::Paused, "Monitoring paused")?;
                Ok(Some(MonitorExit::Interrupted(CommandKind::Pause)))
            }
            JobCommand::Cancel => {
                log::info!("Cancelling {} (job {job_id})", self.probe.describe());
                if let Err(error) = self.probe.kill_remote_job(&mut self.session).await {
                    log::warn!("Cannot stop {}: {error}", self.probe.describe());
                }
                self.store
                    .set_phase(job_id, JobPhase::Cancelled, "Job cancelled")?;
                self.session.close().await;
                Ok(Some(MonitorExit::Interrupted(CommandKind::Cancel)))
            }
        }
    }

    async fn finish_session(&mut self, state: MonitorState, result: &MonitorResult<MonitorExit>) {
        let job_id = self.job.id;
        if let Err(error) = result {
            match error.severity() {
                Severity::Fatal => self.fail_job(error),
                Severity::Recoverable => {
                    log::warn!(
                        "Monitoring of job {job_id} stopped by a recoverable error, it can be resumed later: {error}"
                    );
                }
            }
        }

        let paused = matches!(result, Ok(MonitorExit::Interrupted(CommandKind::Pause)));
        if result.is_err() || (state == MonitorState::WaitRunning && !paused) {
            if let Err(error) = self.probe.clean_up_remote_job(&mut self.session).await {
                log::warn!(
                    "Cleanup of {} failed: {error}",
                    self.probe.describe()
                );
            }
        }

        match self.store.outcome(job_id) {
            Ok(Some(_)) => self.session.close().await,
            Ok(None) => {}
            Err(error) => log::warn!("Cannot read outcome of job {job_id}: {error}"),
        }
    }

    /// Fails the job after a fatal error, unless it already has an outcome.
    fn fail_job(&self, error: &MonitorError) {
        let job_id = self.job.id;
        match self.store.outcome(job_id) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(store_error) => {
                log::error!("Cannot read outcome of job {job_id}: {store_error}");
            }
        }
        let message = error.to_string();
        let result = self
            .store
            .set_outcome(job_id, JobOutcome::FailedSkipArchive, None)
            .and_then(|_| {
                self.store.update_bookkeeping(job_id, &mut |bookkeeping| {
                    bookkeeping.last_message = Some(message.clone());
                })
            })
            .and_then(|_| self.store.set_phase(job_id, JobPhase::Failed, &message));
        if let Err(store_error) = result {
            log::error!("Cannot mark job {job_id} as failed: {store_error}");
        }
    }
}
