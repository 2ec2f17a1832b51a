use serde::{Deserialize, Serialize};

/// Terminal outcome of a tracked step sequence. Exactly one is delivered
/// per sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOutcome {
    Completed,
    Canceled,
    Failed,
}

impl SequenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        assert_eq!(SequenceOutcome::Canceled.as_str(), "canceled");
        assert_eq!(SequenceOutcome::parse("failed"), Some(SequenceOutcome::Failed));
        assert_eq!(SequenceOutcome::parse("done"), None);
    }
}
