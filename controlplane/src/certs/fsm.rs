//! Finite State Machine for certificate provisioning

use serde::{Deserialize, Serialize};

/// Provisioning state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningState {
    /// Waiting for the proxy to issue certificates
    Pending,

    /// Every domain has a certificate
    Provisioned,

    /// At least one domain failed or attempts ran out
    Failed,
}

/// Input to the provisioning FSM
#[derive(Debug, Clone)]
pub enum ProvisioningInput {
    /// Domains are still pending, schedule another attempt
    Retry,

    /// All domains are provisioned
    AllProvisioned,

    /// Provisioning finished with errors
    Failed(String),
}

/// Provisioning FSM.
///
/// Terminal states accept no further input, so a caller that only emits
/// notifications on successful transitions emits exactly one.
#[derive(Debug, Clone)]
pub struct ProvisioningFsm {
    state: ProvisioningState,
    error: Option<String>,
    attempt: u32,
    max_attempts: u32,
}

impl ProvisioningFsm {
    /// Create a new FSM on its first attempt
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ProvisioningState::Pending,
            error: None,
            attempt: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Current attempt, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn can_retry(&self) -> bool {
        self.state == ProvisioningState::Pending && self.attempt < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state != ProvisioningState::Pending
    }

    /// Process an input and transition state
    pub fn process(&mut self, input: ProvisioningInput) -> Result<(), String> {
        let new_state = match (&self.state, &input) {
            (ProvisioningState::Pending, ProvisioningInput::Retry) if self.can_retry() => {
                self.attempt += 1;
                ProvisioningState::Pending
            }
            (ProvisioningState::Pending, ProvisioningInput::AllProvisioned) => ProvisioningState::Provisioned,
            (ProvisioningState::Pending, ProvisioningInput::Failed(err)) => {
                self.error = Some(err.clone());
                ProvisioningState::Failed
            }

            // Invalid transitions
            (state, input) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?} (attempt {}/{})",
                    state, input, self.attempt, self.max_attempts
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
