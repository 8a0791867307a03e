use anyhow::Context;

use crate::monitor::probe::{ProbeFuture, RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::{CommandOutput, RemoteSession, shell_quote};

/// Application running in a Docker container.
pub struct DockerProbe {
    container: String,
    /// Detached containers are removed when monitoring ends.
    detached: bool,
    exit_code: Option<i32>,
}

impl DockerProbe {
    pub fn new(container: &str, detached: bool) -> Self {
        Self {
            container: container.to_string(),
            detached,
            exit_code: None,
        }
    }
}

/// Parses `docker inspect --format '{{.State.Status}} {{.State.ExitCode}}'` output.
fn parse_inspect_output(output: &CommandOutput) -> anyhow::Result<(RemoteStatus, Option<i32>)> {
    if !output.is_success() {
        if output.stderr.contains("No such") {
            return Ok((RemoteStatus::Empty, None));
        }
        log::warn!("docker inspect failed: {}", output.stderr.trim());
        return Ok((RemoteStatus::Null, None));
    }
    let mut items = output.stdout.split_whitespace();
    let (Some(state), Some(code)) = (items.next(), items.next()) else {
        anyhow::bail!("Unexpected docker inspect output `{}`", output.stdout.trim());
    };
    let code: i32 = code
        .parse()
        .with_context(|| format!("Invalid container exit code `{code}`"))?;
    let status = match state {
        "created" => RemoteStatus::Queued,
        "running" | "paused" | "restarting" | "removing" => RemoteStatus::Active,
        "exited" if code == 0 => RemoteStatus::Done,
        "exited" | "dead" => RemoteStatus::Failed,
        _ => anyhow::bail!("Unknown container state {state}"),
    };
    let exit_code = status.is_terminal().then_some(code);
    Ok((status, exit_code))
}

impl RemoteStatusProbe for DockerProbe {
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        _active: bool,
    ) -> ProbeFuture<'a, RemoteStatus> {
        Box::pin(async move {
            let output = session
                .run_command(&format!(
                    "docker inspect --format '{{{{.State.Status}}}} {{{{.State.ExitCode}}}}' {}",
                    shell_quote(&self.container)
                ))
                .await?;
            let (status, exit_code) = parse_inspect_output(&output)?;
            if exit_code.is_some() {
                self.exit_code = exit_code;
            }
            Ok(status)
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
            if !self.detached {
                return Ok(());
            }
            let output = session
                .run_command(&format!("docker rm -f {}", shell_quote(&self.container)))
                .await?;
            if !output.is_success() {
                log::debug!(
                    "Cannot remove container {}: {}",
                    self.container,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn kill_remote_job<'a>(&'a mut self, session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let output = session
                .run_command(&format!("docker stop {}", shell_quote(&self.container)))
                .await?;
            if !output.is_success() {
                log::warn!(
                    "Cannot stop container {}: {}",
                    self.container,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("container {}", self.container)
    }
}

#[cfg(test)]
mod tests {
    use crate::monitor::adapters::DockerProbe;
    use crate::monitor::adapters::docker::parse_inspect_output;
    use crate::monitor::probe::{RemoteStatus, RemoteStatusProbe};
    use crate::monitor::remote::{CommandOutput, RemoteSession};
    use crate::tests::utils::ScriptedConnector;

    #[test]
    fn inspect_states() {
        let parse = |stdout: &str| parse_inspect_output(&CommandOutput::success(stdout)).unwrap();
        assert_eq!(parse("created 0\n"), (RemoteStatus::Queued, None));
        assert_eq!(parse("running 0\n"), (RemoteStatus::Active, None));
        assert_eq!(parse("exited 0\n"), (RemoteStatus::Done, Some(0)));
        assert_eq!(parse("exited 1\n"), (RemoteStatus::Failed, Some(1)));
        assert_eq!(parse("dead 137\n"), (RemoteStatus::Failed, Some(137)));
        assert!(parse_inspect_output(&CommandOutput::success("running")).is_err());
        assert!(parse_inspect_output(&CommandOutput::success("zombie 0")).is_err());
    }

    #[test]
    fn missing_container() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error: No such object: job-1".to_string(),
        };
        assert_eq!(
            parse_inspect_output(&output).unwrap(),
            (RemoteStatus::Empty, None)
        );
    }

    #[tokio::test]
    async fn commands() {
        let (connector, state) = ScriptedConnector::new();
        state.get_mut().push_stdout("exited 2\n");

        let mut session = RemoteSession::new(Box::new(connector));
        let mut probe = DockerProbe::new("job-1", true);
        assert_eq!(
            probe.query_remote_job(&mut session, true).await.unwrap(),
            RemoteStatus::Failed
        );
        assert_eq!(probe.exit_code(), "2");
        probe.clean_up_remote_job(&mut session).await.unwrap();
        assert_eq!(
            state.get().commands,
            vec![
                "docker inspect --format '{{.State.Status}} {{.State.ExitCode}}' job-1",
                "docker rm -f job-1"
            ]
        );
    }

    #[tokio::test]
    async fn attached_container_is_not_removed() {
        let (connector, state) = ScriptedConnector::new();
        let mut session = RemoteSession::new(Box::new(connector));
        let mut probe = DockerProbe::new("job-1", false);
        probe.clean_up_remote_job(&mut session).await.unwrap();
        assert!(state.get().commands.is_empty());
    }
}
