use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_CAPACITY: usize = 1000;
const DEFAULT_FIXED_TIMESTEP_MS: u64 = 20;

/// Tunables shared by the scheduling components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of standby commands; lowest priorities are evicted
    /// beyond this. `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_standby: Option<usize>,
    /// Broadcast channel capacity for lifecycle notifications.
    pub event_capacity: usize,
    /// Interval between fixed-update passes.
    pub fixed_timestep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_standby: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            fixed_timestep_ms: DEFAULT_FIXED_TIMESTEP_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_standby(mut self, max_standby: usize) -> Self {
        self.max_standby = Some(max_standby);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.max_standby.is_none());
        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.fixed_timestep_ms, 20);
    }

    #[test]
    fn test_config_partial_toml() {
        let config: SchedulerConfig = toml::from_str("max_standby = 4").unwrap();
        assert_eq!(config.max_standby, Some(4));
        assert_eq!(config.event_capacity, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default().with_max_standby(2);
        assert_eq!(config.max_standby, Some(2));
    }
}
