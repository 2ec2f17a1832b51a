//! Shared vocabulary for the cadence scheduling core.
//!
//! Lifecycle states, policy flags and ordering keys used by the
//! `scheduler` crate, the notification types in `events`, and the CLI.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;
