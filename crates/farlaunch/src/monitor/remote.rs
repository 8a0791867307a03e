//! Connections to the system where jobs are executed.
use std::future::Future;
use std::pin::Pin;

use tokio::process::Command;

use crate::monitor::error::TransportError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a>>;

/// An open connection to a remote system.
pub trait RemoteConnection {
    /// Executes a shell command on the remote system.
    fn execute<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, CommandOutput>;

    fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// Opens connections to one remote system.
pub trait RemoteConnector {
    fn connect(&self) -> TransportFuture<'_, Box<dyn RemoteConnection>>;

    /// Name of the remote system, used in log messages.
    fn host(&self) -> &str;
}

/// Connection of one monitoring session. The connection is opened lazily and can be closed and
/// reopened between status checks.
pub struct RemoteSession {
    connector: Box<dyn RemoteConnector>,
    connection: Option<Box<dyn RemoteConnection>>,
}

impl RemoteSession {
    pub fn new(connector: Box<dyn RemoteConnector>) -> Self {
        Self {
            connector,
            connection: None,
        }
    }

    pub fn host(&self) -> &str {
        self.connector.host()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    async fn ensure_open(&mut self) -> Result<&mut Box<dyn RemoteConnection>, TransportError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                log::debug!("Opening connection to {}", self.connector.host());
                self.connector.connect().await?
            }
        };
        Ok(self.connection.insert(connection))
    }

    /// Executes a command, reopening the connection once if its channel is broken.
    pub async fn run_command(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        let result = self.ensure_open().await?.execute(command).await;
        match result {
            Err(TransportError::Channel(error)) => {
                log::warn!(
                    "Channel error on connection to {}, reconnecting: {error}",
                    self.connector.host()
                );
                self.close().await;
                self.ensure_open().await?.execute(command).await
            }
            result => result,
        }
    }

    /// Closes the connection if it is open. Errors are only logged.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            log::debug!("Closing connection to {}", self.connector.host());
            if let Err(error) = connection.close().await {
                log::warn!(
                    "Cannot close connection to {}: {error}",
                    self.connector.host()
                );
            }
        }
    }
}

/// Runs commands on the local machine.
pub struct LocalConnector;

impl RemoteConnector for LocalConnector {
    fn connect(&self) -> TransportFuture<'_, Box<dyn RemoteConnection>> {
        Box::pin(async move { Ok(Box::new(LocalConnection) as Box<dyn RemoteConnection>) })
    }

    fn host(&self) -> &str {
        "localhost"
    }
}

pub struct LocalConnection;

impl RemoteConnection for LocalConnection {
    fn execute<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, CommandOutput> {
        Box::pin(async move {
            log::debug!("Running local command `{command}`");
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output()
                .await?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

/// Quotes a value so that it is passed to a shell command as a single word.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
