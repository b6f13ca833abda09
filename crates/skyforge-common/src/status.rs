use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal status of one orchestrator run.
///
/// Legal transitions: `Pending -> Provisioning -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Provisioning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal run status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Provisioning)
                | (RunStatus::Provisioning, RunStatus::Completed)
                | (RunStatus::Provisioning, RunStatus::Failed)
        )
    }

    /// Validate and return the next status.
    pub fn transition(self, next: RunStatus) -> Result<RunStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Provisioning => write!(f, "provisioning"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status field of a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Provisioning,
    Completed,
    Failed,
    Warning,
    Success,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Provisioning => "provisioning",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Warning => "warning",
            EventStatus::Success => "success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
