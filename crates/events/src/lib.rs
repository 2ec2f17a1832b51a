//! Lifecycle notifications for the cadence scheduling core
//!
//! This crate provides the event bus and event types the sequence runner,
//! task dispatcher and command scheduler publish for tooling and debugging.

mod bus;
mod types;

pub use bus::{Drained, EventBus};
pub use types::*;
