use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled command.
///
/// `Invalid -> Standby -> Executing -> Finished -> Destroyed`, with
/// `Destroyed -> Invalid` available for recycling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    #[default]
    Invalid,
    Standby,
    Executing,
    Finished,
    Destroyed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Standby => "standby",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Destroyed => "destroyed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid" => Some(Self::Invalid),
            "standby" => Some(Self::Standby),
            "executing" => Some(Self::Executing),
            "finished" => Some(Self::Finished),
            "destroyed" => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// Whether the command is owned by a scheduler list (standby or executing).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Standby | Self::Executing)
    }
}

/// Arbitration flags a command carries into the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CommandPolicy {
    /// While executing, lower-priority standby commands may not start.
    pub blocks_standby: bool,
    /// Only starts when nothing else is executing.
    pub waits_for_idle: bool,
    /// Destroys every lower-priority command when submitted.
    pub cancels_lower_on_add: bool,
    /// Destroys every lower-priority command when it starts executing.
    pub cancels_lower_on_start: bool,
}

impl CommandPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocking_standby(mut self) -> Self {
        self.blocks_standby = true;
        self
    }

    pub fn waiting_for_idle(mut self) -> Self {
        self.waits_for_idle = true;
        self
    }

    pub fn cancelling_lower_on_add(mut self) -> Self {
        self.cancels_lower_on_add = true;
        self
    }

    pub fn cancelling_lower_on_start(mut self) -> Self {
        self.cancels_lower_on_start = true;
        self
    }

    /// Minimum priority a standby command needs to start while a command
    /// with this policy and `priority` is executing.
    pub fn block_threshold(&self, priority: i32) -> Option<i32> {
        self.blocks_standby.then_some(priority)
    }

    /// Whether a command with this policy may start given the current
    /// executing count and block threshold.
    pub fn may_start(&self, priority: i32, executing: usize, threshold: Option<i32>) -> bool {
        if threshold.is_some_and(|t| priority < t) {
            return false;
        }
        !(self.waits_for_idle && executing > 0)
    }
}

/// Why a command left the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// `update` reported that the command is done.
    Completed,
    /// Explicit cancellation by the caller.
    Canceled,
    /// Destroyed by a higher-priority command's add/start policy.
    Preempted,
    /// Dropped because the standby capacity was exceeded.
    Evicted,
    /// Standby hook reported the command should no longer wait.
    Abandoned,
    /// Start or update returned an error.
    Failed,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Preempted => "preempted",
            Self::Evicted => "evicted",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }
}
