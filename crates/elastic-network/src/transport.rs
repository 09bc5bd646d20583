//! Remote command execution
//!
//! Commands run on nodes through the system `ssh` client. Host keys are not
//! pinned: node addresses are recycled by the provider, so a key remembered
//! for an address is usually that of a node destroyed long ago.

use async_trait::async_trait;
use elastic_core::{ElasticError, ElasticResult, SshConfig};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// `ssh` exit status reserved for connection-level failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status of the remote command
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Transport for running commands on fleet nodes
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on the node at `address`.
    ///
    /// Connection failures are reported as [`ElasticError::Unreachable`];
    /// a command that ran and failed is returned with its exit status.
    async fn run(&self, address: &str, command: &str) -> ElasticResult<CommandOutput>;

    /// Get the transport name
    fn name(&self) -> &'static str;
}

/// Runs remote commands with the `ssh` binary
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Build the ssh invocation for one command
    fn build_command(&self, address: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);

        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        cmd.arg("-o").arg("LogLevel=ERROR");
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        cmd.arg("-p").arg(self.config.port.to_string());

        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }

        cmd.arg(format!("{}@{}", self.config.user, address));
        cmd.arg("--").arg(command);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }
}

#[async_trait]
impl RemoteExec for SshTransport {
    async fn run(&self, address: &str, command: &str) -> ElasticResult<CommandOutput> {
        debug!(address = address, command = command, "Running remote command");

        let mut cmd = self.build_command(address, command);
        let limit = Duration::from_secs(self.config.command_timeout_secs);

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ElasticError::Network(format!(
                    "Failed to spawn {}: {}",
                    self.config.binary.display(),
                    e
                )))
            }
            Err(_) => {
                warn!(address = address, "Remote command timed out");
                return Err(ElasticError::Unreachable(format!(
                    "{}: no answer within {}s",
                    address, self.config.command_timeout_secs
                )));
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };

        if result.status == SSH_CONNECTION_FAILURE {
            return Err(ElasticError::Unreachable(format!(
                "{}: {}",
                address,
                result.stderr.trim()
            )));
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
