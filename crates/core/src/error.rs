use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown execution order: {0}")]
    UnknownExecutionOrder(String),

    #[error("Unknown update phase: {0}")]
    UnknownUpdatePhase(String),
}
