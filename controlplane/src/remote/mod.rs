//! Remote command execution against managed servers.
//!
//! Every orchestrator CLI call goes through [`RemoteExecutor`]. The transport
//! is opaque to callers: a batch of shell commands runs on a host and either
//! yields its combined output or fails with that output attached.

pub mod process;
pub mod recording;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PlaneError;

pub use process::{LocalExecutor, SshExecutor, SshOptions};
pub use recording::RecordingExecutor;

/// A server reachable for remote commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHost {
    pub name: String,
    pub ip: String,
    pub user: String,
    pub port: u16,
}

impl RemoteHost {
    pub fn new(name: &str, ip: &str) -> Self {
        Self {
            name: name.to_string(),
            ip: ip.to_string(),
            user: "root".to_string(),
            port: 22,
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync + std::fmt::Debug {
    /// Run `commands` in order on `host`, stopping at the first failure.
    ///
    /// When `capture_output` is false the output is discarded on success but
    /// still reported on failure.
    async fn run(
        &self,
        host: &RemoteHost,
        commands: &[String],
        capture_output: bool,
    ) -> Result<String, PlaneError>;
}

/// Run a single command and return its trimmed output
pub async fn run_one(
    executor: &dyn RemoteExecutor,
    host: &RemoteHost,
    command: impl Into<String>,
) -> Result<String, PlaneError> {
    let output = executor.run(host, &[command.into()], true).await?;
    Ok(output.trim().to_string())
}

/// Join a command batch into one fail-fast shell script
pub fn to_script(commands: &[String]) -> String {
    let mut script = String::from("set -e\n");
    for command in commands {
        script.push_str(command);
        script.push('\n');
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_fail_fast() {
        let script = to_script(&["echo a".to_string(), "echo b".to_string()]);
        assert_eq!(script, "set -e\necho a\necho b\n");
    }
}
