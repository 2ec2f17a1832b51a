use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Group key deciding when a task runs relative to other tasks.
///
/// Groups are visited in ascending order; tasks inside a group in
/// registration order.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct ExecutionOrder(pub i32);

impl ExecutionOrder {
    pub const EARLY: Self = Self(-100);
    pub const DEFAULT: Self = Self(0);
    pub const LATE: Self = Self(100);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl From<i32> for ExecutionOrder {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "early" => Ok(Self::EARLY),
            "default" => Ok(Self::DEFAULT),
            "late" => Ok(Self::LATE),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| CoreError::UnknownExecutionOrder(s.to_string())),
        }
    }
}

/// Which host-loop phase a dispatch pass belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Update,
    LateUpdate,
    FixedUpdate,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::LateUpdate => "late_update",
            Self::FixedUpdate => "fixed_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update" => Some(Self::Update),
            "late_update" => Some(Self::LateUpdate),
            "fixed_update" => Some(Self::FixedUpdate),
            _ => None,
        }
    }
}

impl FromStr for UpdatePhase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownUpdatePhase(s.to_string()))
    }
}

/// Registration status of a committed task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Killed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Killed => "killed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_order_ordering() {
        assert!(ExecutionOrder::EARLY < ExecutionOrder::DEFAULT);
        assert!(ExecutionOrder::DEFAULT < ExecutionOrder::LATE);
        assert_eq!(ExecutionOrder::from(7).value(), 7);
    }

    #[test]
    fn test_execution_order_parsing() {
        assert_eq!("late".parse::<ExecutionOrder>(), Ok(ExecutionOrder::LATE));
        assert_eq!("Early".parse::<ExecutionOrder>(), Ok(ExecutionOrder::EARLY));
        assert_eq!("-3".parse::<ExecutionOrder>(), Ok(ExecutionOrder(-3)));
        assert!(matches!(
            "soon".parse::<ExecutionOrder>(),
            Err(CoreError::UnknownExecutionOrder(_))
        ));
    }

    #[test]
    fn test_update_phase_strings() {
        assert_eq!(UpdatePhase::FixedUpdate.as_str(), "fixed_update");
        assert_eq!(UpdatePhase::parse("late_update"), Some(UpdatePhase::LateUpdate));
        assert!("tick".parse::<UpdatePhase>().is_err());
    }

    #[test]
    fn test_execution_order_serializes_as_integer() {
        let json = serde_json::to_string(&ExecutionOrder(12)).unwrap();
        assert_eq!(json, "12");
    }
}
