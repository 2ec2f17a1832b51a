//! Priority-arbitrated commands.

mod lifecycle;
mod manager;

pub use lifecycle::{Command, CommandBehavior, CommandHandle, CommandRef};
pub use manager::{CommandManager, CommandSubmitter};
