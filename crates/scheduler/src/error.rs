use cadence_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unsupported step kind: {0}")]
    UnsupportedStepKind(&'static str),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Command {name} failed: {reason}")]
    CommandFailed { name: String, reason: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Command {name} cannot be submitted while {state}")]
    CommandNotInvalid { name: String, state: String },

    #[error("Task already registered: {0}")]
    TaskAlreadyRegistered(String),

    #[error("Operation canceled")]
    Canceled,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SchedulerError {
    /// Create a step failure from any displayable reason.
    pub fn step_failed(reason: impl Into<String>) -> Self {
        Self::StepFailed(reason.into())
    }

    /// Create a command failure error.
    pub fn command_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
