//! Process-backed executors

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::errors::PlaneError;
use crate::remote::{to_script, RemoteExecutor, RemoteHost};

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub key_path: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            key_path: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(3600),
        }
    }
}

/// Runs command batches over `ssh`, feeding the script on stdin
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn command(&self, host: &RemoteHost) -> Command {
        let mut cmd = Command::new("ssh");
        if let Some(key) = &self.options.key_path {
            cmd.args(["-i", key.as_str()]);
        }
        let connect_timeout = format!("ConnectTimeout={}", self.options.connect_timeout.as_secs());
        let port = host.port.to_string();
        let destination = format!("{}@{}", host.user, host.ip);
        cmd.args(["-o", "StrictHostKeyChecking=no", "-o", "BatchMode=yes"])
            .args(["-o", connect_timeout.as_str()])
            .args(["-p", port.as_str()])
            .args([destination.as_str(), "bash -se"]);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        host: &RemoteHost,
        commands: &[String],
        capture_output: bool,
    ) -> Result<String, PlaneError> {
        debug!(server = %host.name, commands = commands.len(), "Running remote commands over ssh");
        let output = tokio::time::timeout(
            self.options.command_timeout,
            run_script(self.command(host), commands),
        )
        .await
        .map_err(|_| PlaneError::RemoteError {
            command: commands.join(" && "),
            output: format!("timed out after {:?}", self.options.command_timeout),
        })??;
        Ok(if capture_output { output } else { String::new() })
    }
}

/// Runs command batches with the local shell. Useful when the control plane
/// lives on the managed server itself.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(
        &self,
        host: &RemoteHost,
        commands: &[String],
        capture_output: bool,
    ) -> Result<String, PlaneError> {
        debug!(server = %host.name, commands = commands.len(), "Running local commands");
        let mut cmd = Command::new("sh");
        cmd.arg("-s");
        let output = run_script(cmd, commands).await?;
        Ok(if capture_output { output } else { String::new() })
    }
}

async fn run_script(mut cmd: Command, commands: &[String]) -> Result<String, PlaneError> {
    let script = to_script(commands);
    let joined = commands.join(" && ");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PlaneError::RemoteError {
            command: joined.clone(),
            output: format!("failed to spawn: {}", e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr).trim().to_string();
        error!("Remote command failed ({}): {}", joined, combined);
        return Err(PlaneError::RemoteError {
            command: joined,
            output: combined,
        });
    }

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_executor_captures_output() {
        let host = RemoteHost::new("localhost", "127.0.0.1");
        let out = LocalExecutor
            .run(&host, &["echo hello".to_string()], true)
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_local_executor_reports_failure_output() {
        let host = RemoteHost::new("localhost", "127.0.0.1");
        let err = LocalExecutor
            .run(
                &host,
                &["echo boom >&2".to_string(), "exit 3".to_string(), "echo never".to_string()],
                false,
            )
            .await
            .unwrap_err();
        match err {
            PlaneError::RemoteError { output, .. } => assert_eq!(output, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
