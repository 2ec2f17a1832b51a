//! Step sequences: the interpreter and the runner that drives many of them.

mod interpreter;
mod runner;
mod step;

pub use interpreter::{Coroutine, Yielded};
pub use runner::{SequenceHandle, SequenceRunner, SequenceSpawner, StartOptions};
pub use step::{from_fn, steps, PendingHandle, PendingOperation, Step, StepSource};
