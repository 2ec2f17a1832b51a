//! Event types for scheduler notifications

use cadence_core::{CommandState, RemovalReason, SequenceOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Emitter sequence number, when published through an ordered emitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: None,
            event,
        }
    }

    /// Attach an emitter sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// All notifications published by the scheduling core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Sequence runner events
    /// A step sequence was submitted to the runner
    #[serde(rename = "sequence.started")]
    SequenceStarted {
        sequence_id: Uuid,
        name: Option<String>,
    },

    /// A step sequence reached a terminal outcome
    #[serde(rename = "sequence.finished")]
    SequenceFinished {
        sequence_id: Uuid,
        name: Option<String>,
        outcome: SequenceOutcome,
        error: Option<String>,
    },

    // Task dispatcher events
    /// A task was committed into its execution-order group
    #[serde(rename = "task.registered")]
    TaskRegistered { name: String, execution_order: i32 },

    /// A task was purged from its group
    #[serde(rename = "task.unregistered")]
    TaskUnregistered { name: String, execution_order: i32 },

    // Command scheduler events
    /// A command was initialized and placed on standby
    #[serde(rename = "command.standby")]
    CommandStandby {
        command_id: Uuid,
        name: String,
        priority: i32,
    },

    /// A command started executing
    #[serde(rename = "command.executing")]
    CommandExecuting {
        command_id: Uuid,
        name: String,
        priority: i32,
    },

    /// A command left the scheduler
    #[serde(rename = "command.removed")]
    CommandRemoved {
        command_id: Uuid,
        name: String,
        priority: i32,
        /// State the command was in when removal began
        from_state: CommandState,
        reason: RemovalReason,
    },

    // System events
    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the command ID associated with this event, if any
    pub fn command_id(&self) -> Option<Uuid> {
        match self {
            Event::CommandStandby { command_id, .. } => Some(*command_id),
            Event::CommandExecuting { command_id, .. } => Some(*command_id),
            Event::CommandRemoved { command_id, .. } => Some(*command_id),
            _ => None,
        }
    }

    /// Get the sequence ID associated with this event, if any
    pub fn sequence_id(&self) -> Option<Uuid> {
        match self {
            Event::SequenceStarted { sequence_id, .. } => Some(*sequence_id),
            Event::SequenceFinished { sequence_id, .. } => Some(*sequence_id),
            _ => None,
        }
    }

    /// Short human-readable label, used by the CLI printer
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SequenceStarted { .. } => "sequence.started",
            Event::SequenceFinished { .. } => "sequence.finished",
            Event::TaskRegistered { .. } => "task.registered",
            Event::TaskUnregistered { .. } => "task.unregistered",
            Event::CommandStandby { .. } => "command.standby",
            Event::CommandExecuting { .. } => "command.executing",
            Event::CommandRemoved { .. } => "command.removed",
            Event::Error { .. } => "error",
        }
    }
}
