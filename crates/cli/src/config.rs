use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cadence_core::CommandPolicy;
use scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "cadence.toml";

const DEFAULT_TICKS: u64 = 120;
const DEFAULT_TICK_MS: u64 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CadenceConfig {
    pub scheduler: SchedulerConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub ticks: u64,
    pub tick_ms: u64,
    pub sequences: Vec<SequenceSpec>,
    pub commands: Vec<CommandSpec>,
    pub cancellations: Vec<CancellationSpec>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks: DEFAULT_TICKS,
            tick_ms: DEFAULT_TICK_MS,
            sequences: Vec::new(),
            commands: Vec::new(),
            cancellations: Vec::new(),
        }
    }
}

/// A scripted step sequence started at `start_tick`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub name: String,
    #[serde(default)]
    pub start_tick: u64,
    /// Signals the sequence's cancellation token at this tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_at_tick: Option<u64>,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSpec {
    Signal(String),
    WaitMs(u64),
    Ticks(u32),
    Nested(Vec<StepSpec>),
}

/// A scripted command submitted at `start_tick`, executing for
/// `duration_ticks` updates once started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub start_tick: u64,
    pub duration_ticks: u32,
    #[serde(flatten)]
    pub policy: CommandPolicy,
}

/// Bulk cancellation of every command at or below `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationSpec {
    pub tick: u64,
    pub threshold: i32,
}

impl CadenceConfig {
    /// Scenario written by `cadence init`.
    pub fn sample() -> Self {
        Self {
            scheduler: SchedulerConfig::default().with_max_standby(8),
            simulation: SimulationConfig {
                ticks: 60,
                tick_ms: DEFAULT_TICK_MS,
                sequences: vec![SequenceSpec {
                    name: "intro".to_string(),
                    start_tick: 0,
                    cancel_at_tick: None,
                    steps: vec![
                        StepSpec::Signal("fade_in".to_string()),
                        StepSpec::WaitMs(100),
                        StepSpec::Nested(vec![
                            StepSpec::Signal("title".to_string()),
                            StepSpec::Ticks(3),
                        ]),
                        StepSpec::Signal("ready".to_string()),
                    ],
                }],
                commands: vec![
                    CommandSpec {
                        name: "idle".to_string(),
                        priority: 1,
                        start_tick: 0,
                        duration_ticks: 40,
                        policy: CommandPolicy::default(),
                    },
                    CommandSpec {
                        name: "attack".to_string(),
                        priority: 5,
                        start_tick: 10,
                        duration_ticks: 8,
                        policy: CommandPolicy::new().blocking_standby(),
                    },
                    CommandSpec {
                        name: "dodge".to_string(),
                        priority: 3,
                        start_tick: 12,
                        duration_ticks: 4,
                        policy: CommandPolicy::default(),
                    },
                ],
                cancellations: Vec::new(),
            },
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.tick_ms == 0 {
            bail!("simulation.tick_ms must be greater than zero");
        }
        if self.scheduler.fixed_timestep_ms == 0 {
            bail!("scheduler.fixed_timestep_ms must be greater than zero");
        }
        if self.scheduler.max_standby == Some(0) {
            bail!("scheduler.max_standby must be greater than zero when set");
        }

        let mut names = HashSet::new();
        for sequence in &sim.sequences {
            if sequence.name.is_empty() {
                bail!("sequence names must not be empty");
            }
            if !names.insert(sequence.name.as_str()) {
                bail!("duplicate sequence name '{}'", sequence.name);
            }
            if let Some(cancel) = sequence.cancel_at_tick {
                if cancel < sequence.start_tick {
                    bail!(
                        "sequence '{}' is canceled before it starts (tick {} < {})",
                        sequence.name,
                        cancel,
                        sequence.start_tick
                    );
                }
            }
        }

        for command in &sim.commands {
            if command.name.is_empty() {
                bail!("command names must not be empty");
            }
            if command.duration_ticks == 0 {
                bail!("command '{}' needs duration_ticks > 0", command.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCENARIO: &str = r#"
[scheduler]
max_standby = 2

[simulation]
ticks = 10

[[simulation.sequences]]
name = "intro"
cancel_at_tick = 4
steps = [{ signal = "a" }, { wait_ms = 50 }, { nested = [{ ticks = 2 }] }]

[[simulation.commands]]
name = "attack"
priority = 5
duration_ticks = 3
blocks_standby = true

[[simulation.cancellations]]
tick = 5
threshold = 1
"#;

    #[test]
    fn test_parse_scenario() {
        let config = CadenceConfig::parse(SCENARIO).unwrap();
        assert_eq!(config.scheduler.max_standby, Some(2));
        assert_eq!(config.scheduler.fixed_timestep_ms, 20);
        assert_eq!(config.simulation.ticks, 10);
        assert_eq!(config.simulation.tick_ms, DEFAULT_TICK_MS);

        let sequence = &config.simulation.sequences[0];
        assert_eq!(sequence.cancel_at_tick, Some(4));
        assert_eq!(
            sequence.steps,
            vec![
                StepSpec::Signal("a".to_string()),
                StepSpec::WaitMs(50),
                StepSpec::Nested(vec![StepSpec::Ticks(2)]),
            ]
        );

        let command = &config.simulation.commands[0];
        assert!(command.policy.blocks_standby);
        assert!(!command.policy.cancels_lower_on_start);
        assert_eq!(config.simulation.cancellations[0].threshold, 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CadenceConfig::parse("").unwrap();
        assert_eq!(config, CadenceConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CadenceConfig::sample();
        config.simulation.tick_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CadenceConfig::sample();
        config.simulation.commands[0].duration_ticks = 0;
        assert!(config.validate().is_err());

        let mut config = CadenceConfig::sample();
        let duplicate = config.simulation.sequences[0].clone();
        config.simulation.sequences.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate sequence name"));
    }

    #[tokio::test]
    async fn test_sample_roundtrips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let sample = CadenceConfig::sample();
        tokio::fs::write(&path, sample.to_toml().unwrap())
            .await
            .unwrap();

        let loaded = CadenceConfig::load(&path).await.unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = CadenceConfig::load(&dir.path().join(CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(loaded, CadenceConfig::default());
    }
}
