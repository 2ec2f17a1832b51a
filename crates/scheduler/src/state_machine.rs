use cadence_core::CommandState;

use crate::error::{Result, SchedulerError};

pub struct CommandStateMachine;

impl CommandStateMachine {
    pub fn validate_transition(from: &CommandState, to: &CommandState) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &CommandState) -> Vec<CommandState> {
        match from {
            CommandState::Invalid => vec![CommandState::Standby, CommandState::Destroyed],
            CommandState::Standby => vec![CommandState::Executing, CommandState::Destroyed],
            // Executing only reaches Destroyed through Finished.
            CommandState::Executing => vec![CommandState::Finished],
            CommandState::Finished => vec![CommandState::Destroyed],
            CommandState::Destroyed => vec![CommandState::Invalid],
        }
    }

    pub fn can_transition(from: &CommandState, to: &CommandState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    pub fn next_state(current: &CommandState) -> Option<CommandState> {
        match current {
            CommandState::Invalid => Some(CommandState::Standby),
            CommandState::Standby => Some(CommandState::Executing),
            CommandState::Executing => Some(CommandState::Finished),
            CommandState::Finished => Some(CommandState::Destroyed),
            CommandState::Destroyed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(CommandStateMachine::can_transition(
            &CommandState::Invalid,
            &CommandState::Standby
        ));
        assert!(CommandStateMachine::can_transition(
            &CommandState::Standby,
            &CommandState::Executing
        ));
        assert!(CommandStateMachine::can_transition(
            &CommandState::Executing,
            &CommandState::Finished
        ));
        assert!(CommandStateMachine::can_transition(
            &CommandState::Finished,
            &CommandState::Destroyed
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!CommandStateMachine::can_transition(
            &CommandState::Invalid,
            &CommandState::Executing
        ));
        assert!(!CommandStateMachine::can_transition(
            &CommandState::Executing,
            &CommandState::Destroyed
        ));
        assert!(!CommandStateMachine::can_transition(
            &CommandState::Destroyed,
            &CommandState::Standby
        ));
    }

    #[test]
    fn test_abort_and_recycle_transitions() {
        assert!(CommandStateMachine::can_transition(
            &CommandState::Standby,
            &CommandState::Destroyed
        ));
        assert!(CommandStateMachine::can_transition(
            &CommandState::Destroyed,
            &CommandState::Invalid
        ));
    }

    #[test]
    fn test_transition_error_message() {
        let err = CommandStateMachine::validate_transition(
            &CommandState::Finished,
            &CommandState::Executing,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from finished to executing"
        );
    }

    #[test]
    fn test_next_state() {
        assert_eq!(
            CommandStateMachine::next_state(&CommandState::Invalid),
            Some(CommandState::Standby)
        );
        assert_eq!(CommandStateMachine::next_state(&CommandState::Destroyed), None);
    }
}
