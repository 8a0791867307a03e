use crate::monitor::adapters::{read_exit_code_file, status_from_exit_code};
use crate::monitor::probe::{ProbeFuture, RemoteStatus, RemoteStatusProbe};
use crate::monitor::remote::RemoteSession;

/// Application started in the background by a launch wrapper, which writes the exit code of
/// the application into the working directory when it ends.
pub struct ProcessProbe {
    pid: u32,
    workdir: String,
    exit_code: Option<i32>,
}

impl ProcessProbe {
    pub fn new(pid: u32, workdir: &str) -> Self {
        Self {
            pid,
            workdir: workdir.to_string(),
            exit_code: None,
        }
    }
}

/// Interprets the output of `ps -o stat=`.
fn parse_process_state(stdout: &str) -> RemoteStatus {
    match stdout.trim().chars().next() {
        // Zombies have already finished
        None | Some('Z') | Some('X') => RemoteStatus::Empty,
        Some(_) => RemoteStatus::Active,
    }
}

impl RemoteStatusProbe for ProcessProbe {
    fn query_remote_job<'a>(
        &'a mut self,
        session: &'a mut RemoteSession,
        active: bool,
    ) -> ProbeFuture<'a, RemoteStatus> {
        Box::pin(async move {
            if active {
                let output = session
                    .run_command(&format!("ps -o stat= -p {}", self.pid))
                    .await?;
                // `ps` fails when the process does not exist
                if !output.is_success() {
                    return Ok(RemoteStatus::Empty);
                }
                Ok(parse_process_state(&output.stdout))
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

    fn kill_remote_job<'a>(&'a mut self, session: &'a mut RemoteSession) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let output = session
                .run_command(&format!("kill -TERM {}", self.pid))
                .await?;
            if !output.is_success() {
                log::warn!(
                    "Cannot kill process {}: {}",
                    self.pid,
                    output.stderr.trim()
                );
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("process {}", self.pid)
    }
}
