//! Ordered multi-group task dispatch.

mod dispatcher;
mod task;

pub use dispatcher::{TaskDispatcher, TaskHandle};
pub use task::{Task, TaskRef};
