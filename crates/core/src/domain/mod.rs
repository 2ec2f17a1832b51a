mod command;
mod sequence;
mod task;

pub use command::*;
pub use sequence::*;
pub use task::*;
