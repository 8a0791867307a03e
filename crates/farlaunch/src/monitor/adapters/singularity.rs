use crate::monitor::adapters::{read_exit_code_file, status_from_exit_code};
use crate::monitor::error::TransportError;
use crate::monitor::probe::{ProbeFuture, RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::{CommandOutput, RemoteSession, shell_quote};

/// Application running in a detached Singularity instance.
pub struct SingularityProbe {
    instance: String,
    workdir: String,
    exit_code: Option<i32>,
}

impl SingularityProbe {
    pub fn new(instance: &str, workdir: &str) -> Self {
        Self {
            instance: instance.to_string(),
            workdir: workdir.to_string(),
            exit_code: None,
        }
    }

    async fn stop_instance(
        &self,
        session: &mut RemoteSession,
    ) -> Result<CommandOutput, TransportError> {
        session
            .run_command(&format!(
                "singularity instance stop {}",
                shell_quote(&self.instance)
            ))
            .await
    }
}

/// Parses `singularity instance list <name>` output, which starts with a header line.
fn parse_instance_list(output: &CommandOutput, instance: &str) -> RemoteStatus {
    if !output.is_success() {
        log::warn!("singularity instance list failed: {}", output.stderr.trim());
        return RemoteStatus::Null;
    }
    let found = output
        .stdout
        .lines()
        .skip(1)
        .any(|line| line.split_whitespace().next() == Some(instance));
    if found {
        RemoteStatus::Active
    } else {
        RemoteStatus::Empty
    }
}

impl RemoteStatusProbe for SingularityProbe {
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        active: bool,
    ) -> ProbeFuture<'a, RemoteStatus> {
        Box::pin(async move {
            if active {
                let output = session
                    .run_command(&format!(
                        "singularity instance list {}",
                        shell_quote(&self.instance)
                    ))
                    .await?;
                Ok(parse_instance_list(&output, &self.instance))
            } else {
                match read_exit_code_file(session, &self.workdir).await? {
                    Some(code) => {
                        self.exit_code = Some(code);
                        Ok(status_from_exit_code(code))
                    }
                    None => Ok(RemoteStatus::Empty),
                }
            }
        })
    }

    fn exit_code(&self) -> String {
        self.exit_code.unwrap_or(0).to_string()
    }

    fn clean_up_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
    ) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            // The instance usually stops on its own when the application ends
            let output = self.stop_instance(session).await?;
            if !output.is_success() {
                log::debug!(
                    "Instance {} was not stopped: {}",
                    self.instance,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn kill_remote_job<'a>(&'a mut self, session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let output = self.stop_instance(session).await?;
            if !output.is_success() {
                log::warn!(
                    "Cannot stop instance {}: {}",
                    self.instance,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("Singularity instance {}", self.instance)
    }
}
