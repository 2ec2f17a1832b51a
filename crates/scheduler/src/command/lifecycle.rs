//! Command lifecycle: `Invalid -> Standby -> Executing -> Finished -> Destroyed`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use cadence_core::{CommandPolicy, CommandState};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::state_machine::CommandStateMachine;

/// Behavior plugged into a [`Command`].
///
/// The scheduler owns every transition; implementations only react to them.
pub trait CommandBehavior {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Higher is more important.
    fn priority(&self) -> i32 {
        0
    }

    fn policy(&self) -> CommandPolicy {
        CommandPolicy::default()
    }

    /// Runs once when the command enters standby.
    fn on_initialize(&mut self) {}

    /// Start-check predicate; `false` keeps the command in standby.
    fn can_start(&mut self) -> bool {
        true
    }

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Standby hook, called once per tick while waiting. Returning `false`
    /// abandons the command.
    fn should_wait(&mut self) -> bool {
        true
    }

    /// Per-tick update while executing. `Ok(false)` means done.
    fn update(&mut self) -> Result<bool>;

    /// Exit logic, runs only if the command started.
    fn on_finish(&mut self) {}

    /// Resource release. Runs exactly once per submission.
    fn on_destroy(&mut self) {}
}

/// Shared command reference; callers keep a clone to inspect state after
/// handing the command to the scheduler.
pub type CommandRef = Rc<RefCell<Command>>;

/// Identifies a command submitted to a [`CommandManager`](super::CommandManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(pub(crate) Uuid);

impl CommandHandle {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// Stateful prioritized unit of work.
pub struct Command {
    id: Uuid,
    behavior: Box<dyn CommandBehavior>,
    state: CommandState,
    exception: Option<SchedulerError>,
}

impl Command {
    pub fn new(behavior: impl CommandBehavior + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            behavior: Box::new(behavior),
            state: CommandState::Invalid,
            exception: None,
        }
    }

    /// Wrap a behavior straight into a [`CommandRef`].
    pub fn shared(behavior: impl CommandBehavior + 'static) -> CommandRef {
        Rc::new(RefCell::new(Self::new(behavior)))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> CommandHandle {
        CommandHandle(self.id)
    }

    pub fn name(&self) -> &str {
        self.behavior.name()
    }

    pub fn priority(&self) -> i32 {
        self.behavior.priority()
    }

    pub fn policy(&self) -> CommandPolicy {
        self.behavior.policy()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Error captured by a failed start or update, or set by
    /// [`cancel_with`](Self::cancel_with).
    pub fn exception(&self) -> Option<&SchedulerError> {
        self.exception.as_ref()
    }

    fn transition(&mut self, to: CommandState) -> Result<()> {
        CommandStateMachine::validate_transition(&self.state, &to)?;
        debug!(
            command_id = %self.id,
            name = self.behavior.name(),
            from = self.state.as_str(),
            to = to.as_str(),
            "Command transition"
        );
        self.state = to;
        Ok(())
    }

    /// Invalid -> Standby.
    pub fn initialize(&mut self) -> Result<()> {
        self.transition(CommandState::Standby)?;
        self.behavior.on_initialize();
        Ok(())
    }

    /// Standby -> Executing, if the start check passes.
    ///
    /// An error from the start hook is captured and returned; the command is
    /// left executing so the caller can tear it down.
    pub fn start(&mut self) -> Result<bool> {
        CommandStateMachine::validate_transition(&self.state, &CommandState::Executing)?;
        if !self.behavior.can_start() {
            return Ok(false);
        }
        self.transition(CommandState::Executing)?;

        if let Err(e) = self.behavior.on_start() {
            let err = SchedulerError::command_failed(self.behavior.name(), e.to_string());
            self.exception = Some(e);
            return Err(err);
        }
        Ok(true)
    }

    /// Standby hook. `false` once the command no longer wants to wait.
    pub(crate) fn wait_in_standby(&mut self) -> bool {
        self.state == CommandState::Standby && self.behavior.should_wait()
    }

    /// One tick of work. Returns `false` once the command should be torn
    /// down, including after a captured error.
    pub fn update(&mut self) -> bool {
        if self.state != CommandState::Executing {
            return false;
        }
        match self.behavior.update() {
            Ok(keep_going) => keep_going,
            Err(e) => {
                warn!(command_id = %self.id, name = self.behavior.name(), error = %e, "Command update failed");
                self.exception = Some(e);
                false
            }
        }
    }

    /// Executing -> Finished. No-op from any other state.
    pub fn finish(&mut self) {
        if self.state != CommandState::Executing {
            return;
        }
        if self.transition(CommandState::Finished).is_ok() {
            self.behavior.on_finish();
        }
    }

    /// Tear the command down from any state. Finishes first if executing.
    ///
    /// Returns `false` if it was already destroyed.
    pub fn destroy(&mut self) -> bool {
        self.finish();
        if self.transition(CommandState::Destroyed).is_err() {
            return false;
        }
        self.behavior.on_destroy();
        debug!(command_id = %self.id, name = self.behavior.name(), "Command destroyed");
        true
    }

    /// Destroy with a captured exception. No-op if already destroyed.
    pub fn cancel_with(&mut self, error: SchedulerError) -> bool {
        if self.state == CommandState::Destroyed {
            return false;
        }
        self.exception = Some(error);
        self.destroy()
    }

    /// Destroyed -> Invalid, so the command can be submitted again.
    pub fn recycle(&mut self) -> Result<()> {
        self.transition(CommandState::Invalid)?;
        self.exception = None;
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("name", &self.behavior.name())
            .field("priority", &self.behavior.priority())
            .field("state", &self.state)
            .field("exception", &self.exception)
            .finish()
    }
}
