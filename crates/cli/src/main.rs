mod config;
mod simulation;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use events::{Event, EventEnvelope};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CadenceConfig, StepSpec, CONFIG_FILE};
use crate::simulation::{RunSummary, Simulation};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Frame-driven cooperative scheduler playground", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample cadence.toml into the current directory
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Run the scripted scenario and print scheduler notifications
    Run {
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,

        /// Override simulation.ticks
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Print raw JSON envelopes
        #[arg(long)]
        json: bool,

        /// Sleep tick_ms between frames and time waits with the wall clock
        #[arg(long)]
        realtime: bool,
    },
    /// Validate the scenario and summarize it
    Check {
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Init { force } => init_config(force).await,
        Commands::Run {
            config,
            ticks,
            json,
            realtime,
        } => run(&config, ticks, json, realtime).await,
        Commands::Check { config } => check(&config).await,
    }
}

async fn init_config(force: bool) -> Result<()> {
    let path = std::env::current_dir()?.join(CONFIG_FILE);

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let content = CadenceConfig::sample().to_toml()?;
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [simulation] tables to script sequences and commands");
    println!("  2. Run 'cadence run' to watch the scheduler tick");

    Ok(())
}

async fn run(path: &Path, ticks: Option<u64>, json: bool, realtime: bool) -> Result<()> {
    let config = CadenceConfig::load(path).await?;
    let ticks = ticks.unwrap_or(config.simulation.ticks);

    let mut simulation = if realtime {
        Simulation::realtime(config)?
    } else {
        Simulation::new(config)?
    };
    let frame = Duration::from_millis(simulation.tick_ms());

    tracing::info!(ticks, realtime, "Starting simulation");

    for _ in 0..ticks {
        let tick = simulation.current_tick();
        for envelope in simulation.tick()? {
            print_event(tick, &envelope, json)?;
        }
        if realtime {
            tokio::time::sleep(frame).await;
        }
    }

    let tick = simulation.current_tick();
    for envelope in simulation.finish() {
        print_event(tick, &envelope, json)?;
    }

    let summary = simulation.summary();
    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn check(path: &Path) -> Result<()> {
    if !path.exists() {
        println!("No config found at {}", path.display());
        println!("Run 'cadence init' to create one.");
        return Ok(());
    }

    let config = CadenceConfig::load(path).await?;
    let sim = &config.simulation;

    println!();
    println!("{} {}", "Config OK:".green().bold(), path.display());
    println!();
    println!(
        "  Ticks:        {} x {}ms (fixed step {}ms)",
        sim.ticks, sim.tick_ms, config.scheduler.fixed_timestep_ms
    );
    match config.scheduler.max_standby {
        Some(max) => println!("  Max standby:  {}", max),
        None => println!("  Max standby:  unbounded"),
    }
    println!();

    println!("Sequences ({}):", sim.sequences.len());
    for sequence in &sim.sequences {
        let cancel = sequence
            .cancel_at_tick
            .map(|t| format!(", canceled at tick {}", t))
            .unwrap_or_default();
        println!(
            "  {} starts at tick {}, {} leaf steps{}",
            sequence.name.bold(),
            sequence.start_tick,
            leaf_count(&sequence.steps),
            cancel
        );
    }

    println!("Commands ({}):", sim.commands.len());
    for command in &sim.commands {
        let mut flags = Vec::new();
        if command.policy.blocks_standby {
            flags.push("blocks-standby");
        }
        if command.policy.waits_for_idle {
            flags.push("waits-for-idle");
        }
        if command.policy.cancels_lower_on_add {
            flags.push("cancels-lower-on-add");
        }
        if command.policy.cancels_lower_on_start {
            flags.push("cancels-lower-on-start");
        }
        println!(
            "  {} p={} at tick {} for {} ticks {}",
            command.name.bold(),
            command.priority,
            command.start_tick,
            command.duration_ticks,
            flags.join(" ").dimmed()
        );
    }

    if !sim.cancellations.is_empty() {
        println!("Cancellations ({}):", sim.cancellations.len());
        for cancellation in &sim.cancellations {
            println!(
                "  tick {}: priority <= {}",
                cancellation.tick, cancellation.threshold
            );
        }
    }
    println!();

    Ok(())
}

fn leaf_count(steps: &[StepSpec]) -> u64 {
    steps
        .iter()
        .map(|step| match step {
            StepSpec::Signal(_) | StepSpec::WaitMs(_) => 1,
            StepSpec::Ticks(n) => u64::from(*n),
            StepSpec::Nested(inner) => leaf_count(inner),
        })
        .sum()
}

fn print_event(tick: u64, envelope: &EventEnvelope, json: bool) -> Result<()> {
    if json {
        println!("{}", envelope.to_json()?);
        return Ok(());
    }

    let seq = envelope.sequence.unwrap_or_default();
    let prefix = format!("[{:>4}] #{:<4}", tick, seq).dimmed();
    println!("{} {}", prefix, describe(&envelope.event));
    Ok(())
}

fn describe(event: &Event) -> String {
    match event {
        Event::SequenceStarted { name, .. } => {
            format!("{} {}", "sequence started".cyan(), label(name))
        }
        Event::SequenceFinished {
            name,
            outcome,
            error,
            ..
        } => {
            let outcome = match outcome {
                cadence_core::SequenceOutcome::Completed => outcome.as_str().green(),
                cadence_core::SequenceOutcome::Canceled => outcome.as_str().yellow(),
                cadence_core::SequenceOutcome::Failed => outcome.as_str().red(),
            };
            match error {
                Some(error) => format!("sequence {} {} ({})", outcome, label(name), error),
                None => format!("sequence {} {}", outcome, label(name)),
            }
        }
        Event::TaskRegistered {
            name,
            execution_order,
        } => format!("task registered {} (order {})", name, execution_order),
        Event::TaskUnregistered {
            name,
            execution_order,
        } => format!("task unregistered {} (order {})", name, execution_order),
        Event::CommandStandby { name, priority, .. } => {
            format!("{} {} p={}", "standby".blue(), name.bold(), priority)
        }
        Event::CommandExecuting { name, priority, .. } => {
            format!("{} {} p={}", "executing".green(), name.bold(), priority)
        }
        Event::CommandRemoved {
            name,
            priority,
            from_state,
            reason,
            ..
        } => format!(
            "{} {} p={} from {} ({})",
            "removed".magenta(),
            name.bold(),
            priority,
            from_state.as_str(),
            reason.as_str()
        ),
        Event::Error { message, context } => match context {
            Some(context) => format!("{} {}: {}", "error".red().bold(), context, message),
            None => format!("{} {}", "error".red().bold(), message),
        },
    }
}

fn label(name: &Option<String>) -> String {
    name.as_deref().unwrap_or("<unnamed>").to_string()
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Summary".bold());
    println!("════════════════════════════════════════");
    println!("  Ticks:       {}", summary.ticks);
    println!("  Events:      {}", summary.events);
    println!(
        "  Passes:      {} update, {} late, {} fixed",
        summary.update_passes, summary.late_update_passes, summary.fixed_update_passes
    );
    println!(
        "  Sequences:   {} completed, {} canceled, {} failed",
        summary.sequences_completed, summary.sequences_canceled, summary.sequences_failed
    );
    println!(
        "  Commands:    {} completed, {} aborted",
        summary.commands_completed, summary.commands_aborted
    );
    println!();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,scheduler=info".into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_count_recurses() {
        let steps = vec![
            StepSpec::Signal("a".to_string()),
            StepSpec::Ticks(3),
            StepSpec::Nested(vec![StepSpec::WaitMs(10), StepSpec::Ticks(2)]),
        ];
        assert_eq!(leaf_count(&steps), 7);
    }

    #[test]
    fn test_describe_command_removed() {
        colored::control::set_override(false);
        let text = describe(&Event::CommandRemoved {
            command_id: uuid::Uuid::nil(),
            name: "attack".to_string(),
            priority: 5,
            from_state: cadence_core::CommandState::Executing,
            reason: cadence_core::RemovalReason::Preempted,
        });
        assert_eq!(text, "removed attack p=5 from executing (preempted)");
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from(["cadence", "run", "--ticks", "5", "--json"]);
        match cli.command {
            Commands::Run {
                config,
                ticks,
                json,
                realtime,
            } => {
                assert_eq!(config, PathBuf::from(CONFIG_FILE));
                assert_eq!(ticks, Some(5));
                assert!(json);
                assert!(!realtime);
            }
            _ => panic!("expected run"),
        }
    }
}
