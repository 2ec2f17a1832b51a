//! Scripted frame loop: hosts the sequence runner and command manager inside
//! a task dispatcher and feeds them the scenario from `cadence.toml`.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use cadence_core::{
    CommandPolicy, ExecutionOrder, RemovalReason, SequenceOutcome, UpdatePhase,
};
use events::{Event, EventBus, EventEnvelope};
use scheduler::{
    steps, CancellationToken, Command, CommandBehavior, CommandManager, Coroutine, ManualClock,
    OrderedEventEmitter, SequenceRunner, SharedClock, StartOptions, Step, SystemClock, Task,
    TaskDispatcher,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::{CadenceConfig, CommandSpec, StepSpec};

/// Command that stays executing for a fixed number of updates.
struct ScriptedCommand {
    name: String,
    priority: i32,
    policy: CommandPolicy,
    remaining: u32,
}

impl From<&CommandSpec> for ScriptedCommand {
    fn from(spec: &CommandSpec) -> Self {
        Self {
            name: spec.name.clone(),
            priority: spec.priority,
            policy: spec.policy,
            remaining: spec.duration_ticks,
        }
    }
}

impl CommandBehavior for ScriptedCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn policy(&self) -> CommandPolicy {
        self.policy
    }

    fn update(&mut self) -> scheduler::Result<bool> {
        self.remaining = self.remaining.saturating_sub(1);
        Ok(self.remaining > 0)
    }
}

/// Counts dispatch passes per phase.
#[derive(Debug, Default)]
struct PhaseCounter {
    update: u64,
    late_update: u64,
    fixed_update: u64,
}

impl Task for PhaseCounter {
    fn name(&self) -> &str {
        "phase_counter"
    }

    fn supports(&self, _phase: UpdatePhase) -> bool {
        true
    }

    fn update(&mut self, phase: UpdatePhase) -> scheduler::Result<()> {
        match phase {
            UpdatePhase::Update => self.update += 1,
            UpdatePhase::LateUpdate => self.late_update += 1,
            UpdatePhase::FixedUpdate => self.fixed_update += 1,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub events: u64,
    pub update_passes: u64,
    pub late_update_passes: u64,
    pub fixed_update_passes: u64,
    pub sequences_completed: u64,
    pub sequences_canceled: u64,
    pub sequences_failed: u64,
    pub commands_completed: u64,
    pub commands_aborted: u64,
}

impl RunSummary {
    fn record(&mut self, event: &Event) {
        match event {
            Event::SequenceFinished { outcome, .. } => match outcome {
                SequenceOutcome::Completed => self.sequences_completed += 1,
                SequenceOutcome::Canceled => self.sequences_canceled += 1,
                SequenceOutcome::Failed => self.sequences_failed += 1,
            },
            Event::CommandRemoved { reason, .. } => match reason {
                RemovalReason::Completed => self.commands_completed += 1,
                _ => self.commands_aborted += 1,
            },
            _ => {}
        }
    }
}

pub fn build_steps(specs: &[StepSpec]) -> Step {
    steps(specs.iter().flat_map(expand))
}

fn expand(spec: &StepSpec) -> Vec<Step> {
    match spec {
        StepSpec::Signal(name) => vec![Step::signal(name.clone())],
        StepSpec::WaitMs(ms) => vec![Step::wait_ms(*ms)],
        StepSpec::Ticks(n) => (0..*n).map(|_| Step::Tick).collect(),
        StepSpec::Nested(inner) => vec![Step::nested(Coroutine::new(build_steps(inner)))],
    }
}

pub struct Simulation {
    config: CadenceConfig,
    dispatcher: TaskDispatcher,
    runner: Rc<RefCell<SequenceRunner>>,
    manager: Rc<RefCell<CommandManager>>,
    phases: Rc<RefCell<PhaseCounter>>,
    manual_clock: Option<ManualClock>,
    emitter: OrderedEventEmitter,
    receiver: broadcast::Receiver<EventEnvelope>,
    tokens: Vec<(u64, CancellationToken)>,
    fixed_accumulator_ms: u64,
    tick: u64,
    summary: RunSummary,
}

impl Simulation {
    /// Deterministic simulation: the clock advances by `tick_ms` per tick.
    pub fn new(config: CadenceConfig) -> Result<Self> {
        let clock = ManualClock::new();
        Self::build(config, clock.shared(), Some(clock))
    }

    /// Wall-clock simulation: waits measure real elapsed time.
    pub fn realtime(config: CadenceConfig) -> Result<Self> {
        Self::build(config, SystemClock::shared(), None)
    }

    fn build(
        config: CadenceConfig,
        clock: SharedClock,
        manual_clock: Option<ManualClock>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::with_capacity(config.scheduler.event_capacity);
        let receiver = bus.subscribe();
        let emitter = OrderedEventEmitter::new(bus);

        let runner = Rc::new(RefCell::new(
            SequenceRunner::with_clock(clock).with_emitter(emitter.clone()),
        ));
        let manager = Rc::new(RefCell::new(
            CommandManager::with_config(&config.scheduler).with_emitter(emitter.clone()),
        ));
        let phases = Rc::new(RefCell::new(PhaseCounter::default()));

        let dispatcher = TaskDispatcher::new().with_emitter(emitter.clone());
        dispatcher.register(runner.clone(), ExecutionOrder::EARLY)?;
        dispatcher.register(manager.clone(), ExecutionOrder::DEFAULT)?;
        dispatcher.register(phases.clone(), ExecutionOrder::LATE)?;

        Ok(Self {
            config,
            dispatcher,
            runner,
            manager,
            phases,
            manual_clock,
            emitter,
            receiver,
            tokens: Vec::new(),
            fixed_accumulator_ms: 0,
            tick: 0,
            summary: RunSummary::default(),
        })
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_ms(&self) -> u64 {
        self.config.simulation.tick_ms
    }

    /// Run one frame and return the notifications it produced.
    pub fn tick(&mut self) -> Result<Vec<EventEnvelope>> {
        let tick = self.tick;
        self.submit_due(tick)?;

        let tick_ms = self.config.simulation.tick_ms;
        let fixed_ms = self.config.scheduler.fixed_timestep_ms;
        self.fixed_accumulator_ms += tick_ms;
        while self.fixed_accumulator_ms >= fixed_ms {
            self.dispatcher.fixed_update();
            self.fixed_accumulator_ms -= fixed_ms;
        }
        self.dispatcher.update();
        self.dispatcher.late_update();

        if let Some(clock) = &self.manual_clock {
            clock.advance_ms(tick_ms);
        }
        self.tick += 1;
        Ok(self.drain())
    }

    fn submit_due(&mut self, tick: u64) -> Result<()> {
        let sim = &self.config.simulation;

        for spec in sim.sequences.iter().filter(|s| s.start_tick == tick) {
            let mut options = StartOptions::new().with_name(spec.name.clone());
            if let Some(cancel_at) = spec.cancel_at_tick {
                let token = CancellationToken::new();
                self.tokens.push((cancel_at, token.clone()));
                options = options.with_cancellation(token);
            }
            debug!(tick, sequence = %spec.name, "Starting sequence");
            self.runner
                .borrow_mut()
                .start(build_steps(&spec.steps), options);
        }

        for (_, token) in self.tokens.iter().filter(|(at, _)| *at == tick) {
            token.cancel();
        }
        self.tokens.retain(|(at, _)| *at > tick);

        for spec in sim.commands.iter().filter(|c| c.start_tick == tick) {
            debug!(tick, command = %spec.name, "Submitting command");
            self.manager
                .borrow_mut()
                .add(Command::shared(ScriptedCommand::from(spec)))
                .with_context(|| format!("Failed to submit command '{}'", spec.name))?;
        }

        for cancellation in sim.cancellations.iter().filter(|c| c.tick == tick) {
            let removed = self
                .manager
                .borrow_mut()
                .cancel_commands(cancellation.threshold);
            debug!(tick, threshold = cancellation.threshold, removed, "Bulk cancellation");
        }
        Ok(())
    }

    /// Cancel everything still in flight and return the final notifications.
    pub fn finish(&mut self) -> Vec<EventEnvelope> {
        self.runner.borrow_mut().dispose();
        self.manager.borrow_mut().dispose();
        self.drain()
    }

    fn drain(&mut self) -> Vec<EventEnvelope> {
        let drained = EventBus::drain(&mut self.receiver);
        if drained.skipped > 0 {
            warn!(skipped = drained.skipped, "Notification receiver lagged");
        }
        for envelope in &drained.envelopes {
            self.summary.record(&envelope.event);
        }
        drained.envelopes
    }

    pub fn summary(&self) -> RunSummary {
        let phases = self.phases.borrow();
        RunSummary {
            ticks: self.tick,
            events: self.emitter.next_sequence(),
            update_passes: phases.update,
            late_update_passes: phases.late_update,
            fixed_update_passes: phases.fixed_update,
            ..self.summary.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CancellationSpec, SequenceSpec};

    fn run(config: CadenceConfig, ticks: u64) -> (Vec<EventEnvelope>, RunSummary) {
        let mut simulation = Simulation::new(config).unwrap();
        let mut events = Vec::new();
        for _ in 0..ticks {
            events.extend(simulation.tick().unwrap());
        }
        events.extend(simulation.finish());
        (events, simulation.summary())
    }

    fn position(events: &[EventEnvelope], kind: &str, name: &str) -> Option<usize> {
        events.iter().position(|envelope| {
            envelope.event.kind() == kind
                && match &envelope.event {
                    Event::CommandExecuting { name: n, .. } | Event::CommandRemoved { name: n, .. } => {
                        n == name
                    }
                    _ => false,
                }
        })
    }

    #[test]
    fn test_build_steps_expands_ticks() {
        let mut coroutine = Coroutine::new(build_steps(&[
            StepSpec::Ticks(2),
            StepSpec::Nested(vec![StepSpec::Signal("x".to_string())]),
        ]));
        let mut advances = 0;
        while coroutine.advance() {
            advances += 1;
        }
        assert_eq!(advances, 3);
    }

    #[test]
    fn test_sample_scenario() {
        let (events, summary) = run(CadenceConfig::sample(), 60);

        assert_eq!(summary.ticks, 60);
        assert_eq!(summary.sequences_completed, 1);
        assert_eq!(summary.commands_completed, 3);
        assert_eq!(summary.commands_aborted, 0);
        assert_eq!(summary.update_passes, 60);
        assert_eq!(summary.late_update_passes, 60);
        // 60 ticks of 16ms over a 20ms fixed step.
        assert_eq!(summary.fixed_update_passes, 48);
        assert_eq!(summary.events, events.len() as u64);

        // The blocking attack holds the lower-priority dodge until it is done.
        let attack_removed = position(&events, "command.removed", "attack").unwrap();
        let dodge_started = position(&events, "command.executing", "dodge").unwrap();
        assert!(attack_removed < dodge_started);
    }

    #[test]
    fn test_cancellations() {
        let mut config = CadenceConfig::sample();
        config.simulation.sequences.push(SequenceSpec {
            name: "looping".to_string(),
            start_tick: 1,
            cancel_at_tick: Some(3),
            steps: vec![StepSpec::Ticks(50)],
        });
        config.simulation.cancellations.push(CancellationSpec {
            tick: 5,
            threshold: 1,
        });

        let (events, summary) = run(config, 20);
        assert_eq!(summary.sequences_canceled, 1);
        assert_eq!(summary.sequences_completed, 1);

        let idle_removed = events
            .iter()
            .find_map(|envelope| match &envelope.event {
                Event::CommandRemoved { name, reason, .. } if name == "idle" => Some(*reason),
                _ => None,
            })
            .unwrap();
        assert_eq!(idle_removed, RemovalReason::Canceled);
    }

    #[test]
    fn test_finish_cancels_in_flight_work() {
        let (_, summary) = run(CadenceConfig::sample(), 5);
        assert_eq!(summary.sequences_canceled, 1);
        assert_eq!(summary.commands_aborted, 1);
    }
}
