use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use derive_builder::Builder;
use log::LevelFilter;
use tokio::task::LocalSet;

use crate::JobId;
use crate::common::WrappedRcRefCell;
use crate::common::config::MonitorConfig;
use crate::monitor::command::{CommandSender, command_channel};
use crate::monitor::error::TransportError;
use crate::monitor::policy::StepwisePolicy;
use crate::monitor::probe::{ProbeFuture, RemoteStatus, RemoteStatusProbe};
use crate::monitor::process::{MonitoredJob, RemoteMonitor};
use crate::monitor::remote::{
    CommandOutput, RemoteConnection, RemoteConnector, RemoteSession, TransportFuture,
};
use crate::monitor::store::{
    JobOutcome, JobPhase, JobStore, MemoryJobStore, MonitorBookkeeping, StoreError, StoreResult,
};

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .try_init();
}

/// Runs a test future inside a local task set.
pub async fn run_test<F: AsyncFnOnce()>(f: F) {
    init_logging();
    LocalSet::new().run_until(f()).await;
}

/// Replies and recorded traffic of a [`ScriptedConnector`].
#[derive(Default)]
pub struct ConnectorState {
    replies: VecDeque<Result<CommandOutput, TransportError>>,
    pub connects: u32,
    pub closes: u32,
    pub commands: Vec<String>,
}

impl ConnectorState {
    pub fn push_output(&mut self, output: CommandOutput) {
        self.replies.push_back(Ok(output));
    }

    pub fn push_stdout(&mut self, stdout: &str) {
        self.push_output(CommandOutput::success(stdout));
    }

    pub fn push_error(&mut self, error: TransportError) {
        self.replies.push_back(Err(error));
    }
}

/// Connector whose connections answer commands with prepared replies.
/// When the replies run out, commands succeed with an empty output.
pub struct ScriptedConnector {
    state: WrappedRcRefCell<ConnectorState>,
}

impl ScriptedConnector {
    pub fn new() -> (Self, WrappedRcRefCell<ConnectorState>) {
        let state = WrappedRcRefCell::wrap(ConnectorState::default());
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl RemoteConnector for ScriptedConnector {
    fn connect(&self) -> TransportFuture<'_, Box<dyn RemoteConnection>> {
        Box::pin(async move {
            self.state.get_mut().connects += 1;
            Ok(Box::new(ScriptedConnection {
                state: self.state.clone(),
            }) as Box<dyn RemoteConnection>)
        })
    }

    fn host(&self) -> &str {
        "scripted"
    }
}

struct ScriptedConnection {
    state: WrappedRcRefCell<ConnectorState>,
}

impl RemoteConnection for ScriptedConnection {
    fn execute<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut state = self.state.get_mut();
            state.commands.push(command.to_string());
            state
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.state.get_mut().closes += 1;
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
pub enum ProbeReply {
    Status(RemoteStatus),
    /// The connection fails.
    Transport(String),
    /// The remote system answers with something the probe does not understand.
    Broken(String),
}

#[derive(Default)]
pub struct ProbeState {
    replies: VecDeque<ProbeReply>,
    /// The `active` flag of each query.
    pub queries: Vec<bool>,
    pub cleanups: u32,
    pub kills: u32,
    exit_code: String,
}

/// Probe that returns prepared statuses. Each query runs one command through the session.
/// When the replies run out, the job is not found.
pub struct ScriptedProbe {
    state: WrappedRcRefCell<ProbeState>,
}

impl RemoteStatusProbe for ScriptedProbe {
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        active: bool,
    ) -> ProbeFuture<'a, RemoteStatus> {
        Box::pin(async move {
            let reply = {
                let mut state = self.state.get_mut();
                state.queries.push(active);
                state
                    .replies
                    .pop_front()
                    .unwrap_or(ProbeReply::Status(RemoteStatus::Empty))
            };
            session.run_command("status").await?;
            match reply {
                ProbeReply::Status(status) => Ok(status),
                ProbeReply::Transport(message) => Err(TransportError::Connect(message).into()),
                ProbeReply::Broken(message) => Err(anyhow::anyhow!(message).into()),
            }
        })
    }

    fn exit_code(&self) -> String {
        self.state.get().exit_code.clone()
    }

    fn clean_up_remote_job<'a>(
        &'a mut self,
        _session: &'a mut RemoteSession,
    ) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            self.state.get_mut().cleanups += 1;
            Ok(())
        })
    }

    fn kill_remote_job<'a>(&'a mut self, _session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            self.state.get_mut().kills += 1;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "scripted job".to_string()
    }
}

/// Store that cannot persist job outcomes, everything else is delegated to a memory store.
pub struct OutcomeRejectingStore {
    inner: MemoryJobStore,
}

impl JobStore for OutcomeRejectingStore {
    fn record_poll_attempt(&self, job_id: JobId, success: bool) -> StoreResult<()> {
        self.inner.record_poll_attempt(job_id, success)
    }

    fn set_outcome(
        &self,
        _job_id: JobId,
        _outcome: JobOutcome,
        _exit_code: Option<&str>,
    ) -> StoreResult<bool> {
        Err(StoreError::Unavailable("outcome table is locked".to_string()))
    }

    fn outcome(&self, job_id: JobId) -> StoreResult<Option<JobOutcome>> {
        self.inner.outcome(job_id)
    }

    fn set_phase(&self, job_id: JobId, phase: JobPhase, reason: &str) -> StoreResult<()> {
        self.inner.set_phase(job_id, phase, reason)
    }

    fn update_bookkeeping(
        &self,
        job_id: JobId,
        update: &mut dyn FnMut(&mut MonitorBookkeeping),
    ) -> StoreResult<()> {
        self.inner.update_bookkeeping(job_id, update)
    }

    fn bookkeeping(&self, job_id: JobId) -> StoreResult<MonitorBookkeeping> {
        self.inner.bookkeeping(job_id)
    }
}

pub struct TestMonitor {
    pub monitor: RemoteMonitor,
    pub job_id: JobId,
    pub store: MemoryJobStore,
    pub commands: CommandSender,
    pub probe: WrappedRcRefCell<ProbeState>,
    pub connector: WrappedRcRefCell<ConnectorState>,
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct MonitorFixture {
    #[builder(default = "JobId::new(1)")]
    job_id: JobId,
    #[builder(default = "JobPhase::Queued")]
    phase: JobPhase,
    #[builder(default)]
    replies: Vec<ProbeReply>,
    #[builder(default)]
    archive_on_error: bool,
    #[builder(default = "\"0\".to_string()", setter(into))]
    exit_code: String,
    #[builder(default = "10")]
    max_consecutive_failures: u32,
    #[builder(default = "3")]
    initial_queuing_retries: u32,
    #[builder(default = "Duration::from_secs(24 * 60 * 60)")]
    max_elapsed: Duration,
    #[builder(default = "true")]
    keep_connection: bool,
    /// Store shared with other monitors, a new one is created when missing.
    #[builder(default, setter(strip_option))]
    store: Option<MemoryJobStore>,
    /// The monitor sees a store that fails to persist outcomes.
    #[builder(default)]
    reject_outcomes: bool,
}

impl MonitorFixtureBuilder {
    pub fn build(self) -> TestMonitor {
        let MonitorFixture {
            job_id,
            phase,
            replies,
            archive_on_error,
            exit_code,
            max_consecutive_failures,
            initial_queuing_retries,
            max_elapsed,
            keep_connection,
            store,
            reject_outcomes,
        } = self.finish().unwrap();

        let store = store.unwrap_or_default();
        store.add_job(job_id, phase);

        let probe = WrappedRcRefCell::wrap(ProbeState {
            replies: replies.into(),
            exit_code,
            ..Default::default()
        });
        let (connector, connector_state) = ScriptedConnector::new();
        let config = MonitorConfig {
            max_elapsed,
            max_consecutive_failures,
            initial_queuing_retries,
            keep_connection,
            ..Default::default()
        };
        let (sender, receiver) = command_channel();
        let monitor_store: Rc<dyn JobStore> = if reject_outcomes {
            Rc::new(OutcomeRejectingStore {
                inner: store.clone(),
            })
        } else {
            Rc::new(store.clone())
        };
        let monitor = RemoteMonitor::new(
            MonitoredJob {
                id: job_id,
                archive_on_error,
            },
            Box::new(ScriptedProbe {
                state: probe.clone(),
            }),
            RemoteSession::new(Box::new(connector)),
            Box::new(StepwisePolicy::new(&config)),
            monitor_store,
            receiver,
        );
        TestMonitor {
            monitor,
            job_id,
            store,
            commands: sender,
            probe,
            connector: connector_state,
        }
    }
}
