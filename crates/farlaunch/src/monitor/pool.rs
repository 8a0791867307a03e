use futures::future::join_all;
use tokio::task::LocalSet;

use crate::JobId;
use crate::monitor::error::{MonitorError, MonitorResult};
use crate::monitor::process::{MonitorExit, RemoteMonitor};
use crate::monitor::store::JobPhase;

/// Runs monitors of several jobs concurrently on the current thread.
#[derive(Default)]
pub struct MonitorPool {
    monitors: Vec<(RemoteMonitor, JobPhase)>,
}

impl MonitorPool {
    pub fn add(&mut self, monitor: RemoteMonitor, phase: JobPhase) {
        self.monitors.push((monitor, phase));
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Runs all monitors until they end.
    /// Results are returned in the order in which the monitors were added.
    pub async fn run(self) -> Vec<(JobId, MonitorResult<MonitorExit>)> {
        let set = LocalSet::new();
        let handles: Vec<_> = self
            .monitors
            .into_iter()
            .map(|(mut monitor, phase)| {
                let job_id = monitor.job_id();
                let handle = set.spawn_local(async move { monitor.run(phase).await });
                (job_id, handle)
            })
            .collect();
        log::debug!("Running {} job monitor(s)", handles.len());

        let (job_ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = set.run_until(join_all(handles)).await;
        job_ids
            .into_iter()
            .zip(results)
            .map(|(job_id, result)| {
                let result = result.unwrap_or_else(|error| {
                    log::error!("Monitor of job {job_id} has crashed: {error}");
                    Err(MonitorError::Aborted(error.to_string()))
                });
                (job_id, result)
            })
            .collect()
    }
}
