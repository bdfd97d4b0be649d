//! Update phase state machine.
//!
//! Commands arrive from unrelated request handlers and are applied through
//! a single entry point, `UpdateStateMachine::apply_command`.
//!
//! | Command            | Precondition | Result          |
//! |--------------------|--------------|-----------------|
//! | `Connect`          | any          | `Connected`     |
//! | `Restart(true)`    | any          | `Connected`     |
//! | `Restart(false)`   | any          | unchanged       |
//! | `BeginTransfer`    | any          | `Downloading`   |
//! | `TransferComplete` | Downloading  | `Downloaded`    |
//! | `TransferFailed`   | Downloading  | `Failed`        |
//!
//! Under `TransitionPolicy::Permissive` preconditions are not enforced and
//! every command is accepted; the phase is informational only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::UpdatePhase;
use crate::store::StatusStore;

/// A state-mutating command from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Restart { update: bool },
    BeginTransfer,
    TransferComplete,
    TransferFailed,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Restart { .. } => "restart",
            Command::BeginTransfer => "beginTransfer",
            Command::TransferComplete => "transferComplete",
            Command::TransferFailed => "transferFailed",
        }
    }

    /// Phase this command requires under the strict policy.
    fn precondition(self) -> Option<UpdatePhase> {
        match self {
            Command::TransferComplete | Command::TransferFailed => Some(UpdatePhase::Downloading),
            _ => None,
        }
    }

    /// Phase after applying this command to `current`.
    fn target(self, current: UpdatePhase) -> UpdatePhase {
        match self {
            Command::Connect | Command::Restart { update: true } => UpdatePhase::Connected,
            Command::Restart { update: false } => current,
            Command::BeginTransfer => UpdatePhase::Downloading,
            Command::TransferComplete => UpdatePhase::Downloaded,
            Command::TransferFailed => UpdatePhase::Failed,
        }
    }
}

/// How preconditions are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Accept every command in every phase.
    #[default]
    Permissive,
    /// Reject commands whose precondition does not hold.
    Strict,
}

/// Errors returned by `apply_command`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command {command} is not allowed in phase {phase}")]
    IllegalTransition {
        command: &'static str,
        phase: UpdatePhase,
    },
}

/// Outcome of an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: UpdatePhase,
    pub current: UpdatePhase,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Applies commands to the phase held by a `StatusStore`.
#[derive(Debug, Clone)]
pub struct UpdateStateMachine {
    store: Arc<StatusStore>,
    policy: TransitionPolicy,
}

impl UpdateStateMachine {
    pub fn new(store: Arc<StatusStore>, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    /// Apply one command atomically.
    pub fn apply_command(&self, command: Command) -> Result<Transition, CommandError> {
        let policy = self.policy;
        let (previous, current) = self.store.transition(|phase| {
            if policy == TransitionPolicy::Strict {
                if let Some(required) = command.precondition() {
                    if phase != required {
                        return Err(CommandError::IllegalTransition {
                            command: command.name(),
                            phase,
                        });
                    }
                }
            }
            Ok(command.target(phase))
        })?;

        let transition = Transition { previous, current };
        if transition.changed() {
            info!("Update phase {} -> {} ({})", previous, current, command.name());
        } else {
            debug!("Command {} left phase at {}", command.name(), current);
        }
        Ok(transition)
    }
}
