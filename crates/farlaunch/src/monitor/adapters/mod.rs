//! Status probes of the supported execution technologies.
pub mod docker;
pub mod process;
pub mod singularity;
pub mod slurm;

use anyhow::Context;

use crate::monitor::error::MonitorResult;
use crate::monitor::probe::{RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::{RemoteSession, shell_quote};

pub use docker::DockerProbe;
pub use process::ProcessProbe;
pub use singularity::SingularityProbe;
pub use slurm::SlurmProbe;

/// File in the job working directory where the launch wrapper stores the exit code of the
/// application.
pub const EXIT_CODE_FILE: &str = "farlaunch.exitcode";

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Process started in the background, identified by its PID
    Process,
    /// Slurm batch job, identified by its job ID
    Slurm,
    /// Docker container, identified by its name
    Docker,
    /// Singularity instance, identified by its name
    Singularity,
}

/// Creates the probe of a job.
///
/// `target` identifies the job on the remote system, `workdir` is the job working directory.
pub fn create_probe(
    kind: ProbeKind,
    target: &str,
    workdir: &str,
) -> anyhow::Result<Box<dyn RemoteStatusProbe>> {
    let probe: Box<dyn RemoteStatusProbe> = match kind {
        ProbeKind::Process => {
            let pid = target
                .parse()
                .with_context(|| format!("Invalid process ID `{target}`"))?;
            Box::new(ProcessProbe::new(pid, workdir))
        }
        ProbeKind::Slurm => Box::new(SlurmProbe::new(target)),
        ProbeKind::Docker => Box::new(DockerProbe::new(target, true)),
        ProbeKind::Singularity => Box::new(SingularityProbe::new(target, workdir)),
    };
    Ok(probe)
}

/// Reads the exit code stored by the launch wrapper.
/// Returns `None` if the file does not exist (yet).
pub(crate) async fn read_exit_code_file(
    session: &mut RemoteSession,
    workdir: &str,
) -> MonitorResult<Option<i32>> {
    let path = format!("{}/{EXIT_CODE_FILE}", workdir.trim_end_matches('/'));
    let output = session
        .run_command(&format!("cat {} 2>/dev/null", shell_quote(&path)))
        .await?;
    if !output.is_success() {
        return Ok(None);
    }
    Ok(Some(parse_exit_code(&output.stdout)?))
}

pub(crate) fn parse_exit_code(text: &str) -> anyhow::Result<i32> {
    let text = text.trim();
    text.parse()
        .with_context(|| format!("Invalid exit code `{text}`"))
}

/// Status of a job that ended with the given exit code.
pub(crate) fn status_from_exit_code(code: i32) -> RemoteStatus {
    if code == 0 {
        RemoteStatus::Done
    } else {
        RemoteStatus::Failed
    }
}
