//! Scripted executor that records every command it is asked to run.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::PlaneError;
use crate::remote::{RemoteExecutor, RemoteHost};

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: Result<String, String>,
}

/// Dry-run executor.
///
/// Commands are matched against rules by substring, first rule wins. An
/// unmatched command succeeds with empty output. A batch returns the output
/// of its last command and stops at the first failing one.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    unreachable: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to commands containing `pattern` with `output`
    pub fn respond(self, pattern: &str, output: &str) -> Self {
        self.push_rule(pattern, Ok(output.to_string()));
        self
    }

    /// Fail commands containing `pattern` with `output`
    pub fn fail(self, pattern: &str, output: &str) -> Self {
        self.push_rule(pattern, Err(output.to_string()));
        self
    }

    /// Commands sent to the host at `ip` never return
    pub fn unreachable(self, ip: &str) -> Self {
        if let Ok(mut hosts) = self.unreachable.lock() {
            hosts.push(ip.to_string());
        }
        self
    }

    fn is_unreachable(&self, host: &RemoteHost) -> bool {
        self.unreachable
            .lock()
            .map(|hosts| hosts.contains(&host.ip))
            .unwrap_or(false)
    }

    fn push_rule(&self, pattern: &str, response: Result<String, String>) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                response,
            });
        }
    }

    /// Every command run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Commands run so far that contain `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    fn respond_to(&self, command: &str) -> Result<String, String> {
        let rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(String::new()),
        };
        rules
            .iter()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.response.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(
        &self,
        host: &RemoteHost,
        commands: &[String],
        capture_output: bool,
    ) -> Result<String, PlaneError> {
        let mut last = String::new();
        for command in commands {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(command.clone());
            }
            if self.is_unreachable(host) {
                std::future::pending::<()>().await;
            }
            match self.respond_to(command) {
                Ok(output) => last = output,
                Err(output) => {
                    return Err(PlaneError::RemoteError {
                        command: command.clone(),
                        output,
                    })
                }
            }
        }
        Ok(if capture_output { last } else { String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let executor = RecordingExecutor::new()
            .respond("echo", "ok")
            .fail("false", "nope");
        let host = RemoteHost::new("s1", "10.0.0.1");

        let err = executor
            .run(
                &host,
                &["echo 1".to_string(), "false".to_string(), "echo 2".to_string()],
                true,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert_eq!(executor.calls(), vec!["echo 1", "false"]);
    }
}
