use crate::monitor::probe::{ProbeFuture, RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::{CommandOutput, RemoteSession, shell_quote};

/// Batch job submitted to Slurm.
pub struct SlurmProbe {
    job_id: String,
    exit_code: Option<i32>,
}

impl SlurmProbe {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            exit_code: None,
        }
    }
}

/// Maps a Slurm job state (as printed by `squeue` or `sacct`) to a remote status.
fn parse_slurm_state(state: &str) -> anyhow::Result<RemoteStatus> {
    // sacct prints e.g. `CANCELLED by 1000`
    let state = state.split_whitespace().next().unwrap_or_default();
    let status = match state {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED"
        | "RESV_DEL_HOLD" => RemoteStatus::Queued,
        "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" | "SIGNALING" | "STAGE_OUT"
        | "RESIZING" => RemoteStatus::Active,
        "COMPLETED" => RemoteStatus::Done,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" | "BOOT_FAIL"
        | "DEADLINE" | "OUT_OF_MEMORY" | "REVOKED" | "SPECIAL_EXIT" => RemoteStatus::Failed,
        "" => RemoteStatus::Empty,
        _ => anyhow::bail!("Unknown Slurm job state {state}"),
    };
    Ok(status)
}

/// Parses `squeue -h -o %T` output.
fn parse_squeue_output(output: &CommandOutput) -> anyhow::Result<RemoteStatus> {
    if !output.is_success() {
        // Jobs that ended some time ago are not known to squeue anymore
        if output.stderr.contains("Invalid job id") {
            return Ok(RemoteStatus::Empty);
        }
        log::warn!("squeue failed: {}", output.stderr.trim());
        return Ok(RemoteStatus::Null);
    }
    let state = output.stdout.lines().next().unwrap_or_default();
    parse_slurm_state(state.trim())
}

/// Parses `sacct -n -X -P -o State,ExitCode` output into a status and an exit code.
fn parse_sacct_output(output: &CommandOutput) -> anyhow::Result<(RemoteStatus, Option<i32>)> {
    if !output.is_success() {
        log::warn!("sacct failed: {}", output.stderr.trim());
        return Ok((RemoteStatus::Null, None));
    }
    let Some(line) = output.stdout.lines().find(|line| !line.trim().is_empty()) else {
        return Ok((RemoteStatus::Empty, None));
    };
    let mut items = line.trim().split('|');
    let status = parse_slurm_state(items.next().unwrap_or_default())?;
    let exit_code = match items.next() {
        // `<exit code>:<signal>`
        Some(code) => {
            let code = code.split(':').next().unwrap_or_default();
            Some(
                code.parse()
                    .map_err(|_| anyhow::anyhow!("Invalid Slurm exit code `{code}`"))?,
            )
        }
        None => None,
    };
    Ok((status, exit_code))
}

impl RemoteStatusProbe for SlurmProbe {
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        active: bool,
    ) -> ProbeFuture<'a, RemoteStatus> {
        Box::pin(async move {
            let job_id = shell_quote(&self.job_id);
            if active {
                let output = session
                    .run_command(&format!("squeue -h -j {job_id} -o %T"))
                    .await?;
                Ok(parse_squeue_output(&output)?)
            } else {
                let output = session
                    .run_command(&format!("sacct -n -X -P -j {job_id} -o State,ExitCode"))
                    .await?;
                let (status, exit_code) = parse_sacct_output(&output)?;
                if exit_code.is_some() {
                    self.exit_code = exit_code;
                }
                Ok(status)
            }
        })
    }

    fn exit_code(&self) -> String {
        self.exit_code.unwrap_or(0).to_string()
    }

    fn kill_remote_job<'a>(&'a mut self, session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let output = session
                .run_command(&format!("scancel {}", shell_quote(&self.job_id)))
                .await?;
            if !output.is_success() {
                log::warn!(
                    "Cannot cancel Slurm job {}: {}",
                    self.job_id,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("Slurm job {}", self.job_id)
    }
}
