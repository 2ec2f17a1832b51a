//! Cooperative, frame-driven scheduling core.
//!
//! Everything here runs on a single logical thread and advances once per
//! tick of the host loop:
//!
//! - [`Coroutine`] - stack-based interpreter for nested step sequences
//! - [`SequenceRunner`] - advances many coroutines per tick and reports
//!   exactly one terminal outcome for each
//! - [`TaskDispatcher`] - runs updatable tasks in execution-order groups
//!   with deferred registration
//! - [`CommandManager`] - priority arbitration for stateful commands

pub mod clock;
pub mod command;
pub mod config;
pub mod coroutine;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod state_machine;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use command::{
    Command, CommandBehavior, CommandHandle, CommandManager, CommandRef, CommandSubmitter,
};
pub use config::SchedulerConfig;
pub use coroutine::{
    from_fn, steps, Coroutine, PendingHandle, PendingOperation, SequenceHandle, SequenceRunner,
    SequenceSpawner, StartOptions, Step, StepSource, Yielded,
};
pub use dispatch::{Task, TaskDispatcher, TaskHandle, TaskRef};
pub use emitter::OrderedEventEmitter;
pub use error::{Result, SchedulerError};
pub use state_machine::CommandStateMachine;
pub use tokio_util::sync::CancellationToken;
