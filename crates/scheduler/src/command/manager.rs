//! Command scheduler.
//!
//! Commands wait in a standby list until policy lets them start, then move to
//! an executing list and are updated once per tick until they report done.
//! Several commands may execute at once. Two independent policies shape
//! arbitration:
//!
//! - blocking: an executing command with `blocks_standby` keeps
//!   lower-priority standby commands from starting, without touching them
//! - preemption: `cancels_lower_on_add` / `cancels_lower_on_start` destroy
//!   every lower-priority command, standby or executing
//!
//! Standby is kept in ascending priority order and executing in descending
//! order. Both sorts are stable, so equal priorities keep their submission
//! order.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::fmt;
use std::rc::Rc;

use cadence_core::{CommandPolicy, CommandState, RemovalReason, UpdatePhase};
use events::Event;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lifecycle::{CommandHandle, CommandRef};
use crate::config::SchedulerConfig;
use crate::dispatch::Task;
use crate::emitter::{emit, OrderedEventEmitter};
use crate::error::{Result, SchedulerError};

/// Scheduler-side bookkeeping for a live command. Priority and policy are
/// captured at submission.
#[derive(Clone)]
struct Entry {
    id: Uuid,
    name: String,
    priority: i32,
    policy: CommandPolicy,
    command: CommandRef,
}

impl Entry {
    fn state(&self) -> Option<CommandState> {
        self.command.try_borrow().ok().map(|cmd| cmd.state())
    }
}

/// Clonable handle for submitting commands from inside a running command or
/// task. Submissions go through [`CommandManager::add`] at the start of the
/// next update.
#[derive(Clone, Default)]
pub struct CommandSubmitter {
    queue: Rc<RefCell<Vec<CommandRef>>>,
}

impl CommandSubmitter {
    pub fn submit(&self, command: CommandRef) {
        self.queue.borrow_mut().push(command);
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

pub struct CommandManager {
    standby: Vec<Entry>,
    executing: Vec<Entry>,
    /// Removed entries whose command was borrowed at teardown time.
    deferred: Vec<(Entry, RemovalReason)>,
    standby_dirty: bool,
    max_standby: Option<usize>,
    submitter: CommandSubmitter,
    emitter: Option<OrderedEventEmitter>,
}

impl CommandManager {
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    pub fn with_config(config: &SchedulerConfig) -> Self {
        Self {
            standby: Vec::new(),
            executing: Vec::new(),
            deferred: Vec::new(),
            standby_dirty: false,
            max_standby: config.max_standby,
            submitter: CommandSubmitter::default(),
            emitter: None,
        }
    }

    pub fn with_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn submitter(&self) -> CommandSubmitter {
        self.submitter.clone()
    }

    pub fn standby_count(&self) -> usize {
        self.standby.len()
    }

    pub fn executing_count(&self) -> usize {
        self.executing.len()
    }

    /// Executing commands, highest priority first.
    pub fn executing(&self) -> Vec<CommandRef> {
        self.executing.iter().map(|e| e.command.clone()).collect()
    }

    /// Standby commands, lowest priority first.
    /// Commands already removed but not yet destroyed because a caller held
    /// a borrow. They are destroyed at the next update.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn standby(&self) -> Vec<CommandRef> {
        let mut entries = self.standby.clone();
        entries.sort_by_key(|e| e.priority);
        entries.into_iter().map(|e| e.command).collect()
    }

    /// Submit a command. Destroyed commands are recycled first; anything
    /// else not in `Invalid` is rejected.
    ///
    /// The returned handle stays valid even if the command is evicted by the
    /// capacity limit during this call.
    pub fn add(&mut self, command: CommandRef) -> Result<CommandHandle> {
        let entry = {
            let mut cmd = command.try_borrow_mut().map_err(|_| {
                SchedulerError::command_failed("<busy>", "command is already borrowed")
            })?;

            if cmd.state() == CommandState::Destroyed {
                cmd.recycle()?;
            }
            if cmd.state() != CommandState::Invalid {
                return Err(SchedulerError::CommandNotInvalid {
                    name: cmd.name().to_string(),
                    state: cmd.state().as_str().to_string(),
                });
            }
            cmd.initialize()?;

            Entry {
                id: cmd.id(),
                name: cmd.name().to_string(),
                priority: cmd.priority(),
                policy: cmd.policy(),
                command: command.clone(),
            }
        };

        info!(
            command_id = %entry.id,
            name = %entry.name,
            priority = entry.priority,
            "Command added to standby"
        );
        emit(
            &self.emitter,
            Event::CommandStandby {
                command_id: entry.id,
                name: entry.name.clone(),
                priority: entry.priority,
            },
        );

        let handle = CommandHandle(entry.id);
        let (priority, policy) = (entry.priority, entry.policy);
        self.standby.push(entry);
        self.standby_dirty = true;

        if policy.cancels_lower_on_add {
            self.remove_where(RemovalReason::Preempted, |p| p < priority);
        }
        self.enforce_capacity();

        Ok(handle)
    }

    /// Destroy every standby or executing command with priority at or below
    /// `threshold`. Returns how many were removed.
    pub fn cancel_commands(&mut self, threshold: i32) -> usize {
        self.remove_where(RemovalReason::Canceled, |p| p <= threshold)
    }

    /// Destroy one command. `false` if the scheduler no longer owns it.
    pub fn cancel(&mut self, handle: CommandHandle) -> bool {
        let entry = if let Some(i) = self.standby.iter().position(|e| e.id == handle.0) {
            self.standby.remove(i)
        } else if let Some(i) = self.executing.iter().position(|e| e.id == handle.0) {
            self.executing.remove(i)
        } else {
            return false;
        };
        self.teardown(entry, RemovalReason::Canceled);
        true
    }

    /// Destroy everything, executing commands first, newest first.
    pub fn clear(&mut self) {
        self.retry_deferred();
        let executing = std::mem::take(&mut self.executing);
        let standby = std::mem::take(&mut self.standby);
        for entry in executing.into_iter().rev().chain(standby.into_iter().rev()) {
            self.teardown(entry, RemovalReason::Canceled);
        }
        self.standby_dirty = false;
    }

    pub fn dispose(&mut self) {
        self.clear();
    }

    fn remove_where(&mut self, reason: RemovalReason, matches: impl Fn(i32) -> bool) -> usize {
        let mut removed = Vec::new();
        self.executing.retain(|e| {
            let hit = matches(e.priority);
            if hit {
                removed.push(e.clone());
            }
            !hit
        });
        self.standby.retain(|e| {
            let hit = matches(e.priority);
            if hit {
                removed.push(e.clone());
            }
            !hit
        });

        let count = removed.len();
        for entry in removed {
            self.teardown(entry, reason);
        }
        count
    }

    fn enforce_capacity(&mut self) {
        let Some(max) = self.max_standby else {
            return;
        };
        if self.standby.len() <= max {
            return;
        }

        self.sort_standby();
        let overflow = self.standby.len() - max;
        let evicted: Vec<Entry> = self.standby.drain(..overflow).collect();
        for entry in evicted {
            warn!(
                command_id = %entry.id,
                name = %entry.name,
                priority = entry.priority,
                max_standby = max,
                "Standby capacity exceeded, evicting"
            );
            self.teardown(entry, RemovalReason::Evicted);
        }
    }

    fn sort_standby(&mut self) {
        self.standby.sort_by_key(|e| e.priority);
        self.standby_dirty = false;
    }

    /// Destroy the command and report its removal. A borrowed command is
    /// parked in `deferred` and destroyed on a later update.
    fn teardown(&mut self, entry: Entry, reason: RemovalReason) {
        let destroyed_from = match entry.command.try_borrow_mut() {
            Ok(mut cmd) => {
                let from = cmd.state();
                cmd.destroy();
                Some(from)
            }
            Err(_) => None,
        };
        let Some(from_state) = destroyed_from else {
            warn!(command_id = %entry.id, name = %entry.name, "Command busy, teardown deferred");
            self.deferred.push((entry, reason));
            return;
        };

        debug!(
            command_id = %entry.id,
            name = %entry.name,
            priority = entry.priority,
            from = from_state.as_str(),
            reason = reason.as_str(),
            "Command removed"
        );
        emit(
            &self.emitter,
            Event::CommandRemoved {
                command_id: entry.id,
                name: entry.name.clone(),
                priority: entry.priority,
                from_state,
                reason,
            },
        );
    }

    fn retry_deferred(&mut self) {
        for (entry, reason) in std::mem::take(&mut self.deferred) {
            self.teardown(entry, reason);
        }
    }

    fn apply_submissions(&mut self) {
        let submitted = std::mem::take(&mut *self.submitter.queue.borrow_mut());
        for command in submitted {
            if let Err(e) = self.add(command) {
                warn!(error = %e, "Deferred command submission rejected");
            }
        }
    }

    /// Highest priority among executing commands that block standby.
    fn block_threshold(&self) -> Option<i32> {
        self.executing
            .iter()
            .filter_map(|e| e.policy.block_threshold(e.priority))
            .max()
    }

    /// One scheduling pass.
    pub fn update(&mut self) {
        self.retry_deferred();
        self.apply_submissions();

        if self.standby_dirty {
            self.sort_standby();
        }

        let mut threshold = self.block_threshold();

        // Standby hooks; abandoned or externally destroyed commands drop out.
        for i in (0..self.standby.len()).rev() {
            let waiting = match self.standby[i].command.try_borrow_mut() {
                Ok(mut cmd) => cmd.wait_in_standby(),
                Err(_) => true,
            };
            if !waiting {
                let entry = self.standby.remove(i);
                self.teardown(entry, RemovalReason::Abandoned);
            }
        }

        // Start attempts, highest priority first.
        let mut candidates = self.standby.clone();
        candidates.sort_by_key(|e| Reverse(e.priority));
        let mut executing_changed = false;

        for entry in candidates {
            if entry.state() != Some(CommandState::Standby)
                || !self.standby.iter().any(|e| e.id == entry.id)
            {
                continue;
            }
            if !entry
                .policy
                .may_start(entry.priority, self.executing.len(), threshold)
            {
                continue;
            }

            let started = match entry.command.try_borrow_mut() {
                Ok(mut cmd) => cmd.start(),
                Err(_) => continue,
            };

            match started {
                Ok(false) => continue,
                Ok(true) => {
                    self.standby.retain(|e| e.id != entry.id);
                    info!(
                        command_id = %entry.id,
                        name = %entry.name,
                        priority = entry.priority,
                        "Command executing"
                    );
                    emit(
                        &self.emitter,
                        Event::CommandExecuting {
                            command_id: entry.id,
                            name: entry.name.clone(),
                            priority: entry.priority,
                        },
                    );
                    if let Some(block) = entry.policy.block_threshold(entry.priority) {
                        threshold = Some(threshold.map_or(block, |t| t.max(block)));
                    }
                    let (priority, preempts) = (entry.priority, entry.policy.cancels_lower_on_start);
                    self.executing.push(entry);
                    executing_changed = true;

                    if preempts {
                        self.remove_where(RemovalReason::Preempted, |p| p < priority);
                    }
                }
                Err(e) => {
                    warn!(command_id = %entry.id, error = %e, "Command failed to start");
                    self.standby.retain(|s| s.id != entry.id);
                    self.teardown(entry, RemovalReason::Failed);
                }
            }
        }

        if executing_changed {
            self.executing.sort_by_key(|e| Reverse(e.priority));
        }

        // Updates, highest priority first, equal priorities in start order.
        let mut finished = Vec::new();
        for entry in &self.executing {
            let Ok(mut cmd) = entry.command.try_borrow_mut() else {
                continue;
            };
            if !(cmd.update() && cmd.state() == CommandState::Executing) {
                let reason = if cmd.exception().is_some() {
                    RemovalReason::Failed
                } else {
                    RemovalReason::Completed
                };
                finished.push((entry.id, reason));
            }
        }

        for (id, reason) in finished {
            if let Some(i) = self.executing.iter().position(|e| e.id == id) {
                let entry = self.executing.remove(i);
                self.teardown(entry, reason);
            }
        }
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandManager")
            .field("standby", &self.standby.len())
            .field("executing", &self.executing.len())
            .field("max_standby", &self.max_standby)
            .finish()
    }
}

impl Task for CommandManager {
    fn name(&self) -> &str {
        "command_manager"
    }

    fn update(&mut self, _phase: UpdatePhase) -> Result<()> {
        CommandManager::update(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandBehavior};
    use events::EventBus;

    struct Scripted {
        name: &'static str,
        priority: i32,
        policy: CommandPolicy,
        ticks: u32,
        wait: bool,
    }

    impl Scripted {
        fn new(name: &'static str, priority: i32) -> Self {
            Self {
                name,
                priority,
                policy: CommandPolicy::default(),
                ticks: u32::MAX,
                wait: true,
            }
        }

        fn policy(mut self, policy: CommandPolicy) -> Self {
            self.policy = policy;
            self
        }

        fn ticks(mut self, ticks: u32) -> Self {
            self.ticks = ticks;
            self
        }

        fn shared(self) -> CommandRef {
            Command::shared(self)
        }
    }

    impl CommandBehavior for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn policy(&self) -> CommandPolicy {
            self.policy
        }

        fn should_wait(&mut self) -> bool {
            self.wait
        }

        fn update(&mut self) -> Result<bool> {
            self.ticks = self.ticks.saturating_sub(1);
            Ok(self.ticks > 0)
        }
    }

    fn state(command: &CommandRef) -> CommandState {
        command.borrow().state()
    }

    #[test]
    fn test_multiple_commands_execute_together() {
        let mut manager = CommandManager::new();
        let a = Scripted::new("a", 1).shared();
        let b = Scripted::new("b", 2).shared();
        manager.add(a.clone()).unwrap();
        manager.add(b.clone()).unwrap();

        manager.update();
        assert_eq!(state(&a), CommandState::Executing);
        assert_eq!(state(&b), CommandState::Executing);
        assert_eq!(manager.executing_count(), 2);
        assert_eq!(manager.standby_count(), 0);
    }

    #[test]
    fn test_add_rejects_live_command() {
        let mut manager = CommandManager::new();
        let a = Scripted::new("a", 1).shared();
        manager.add(a.clone()).unwrap();

        let err = manager.add(a.clone()).unwrap_err();
        assert!(matches!(err, SchedulerError::CommandNotInvalid { ref state, .. } if state == "standby"));
    }

    #[test]
    fn test_add_recycles_destroyed_command() {
        let mut manager = CommandManager::new();
        let a = Scripted::new("a", 1).shared();
        let handle = manager.add(a.clone()).unwrap();
        assert!(manager.cancel(handle));
        assert_eq!(state(&a), CommandState::Destroyed);

        manager.add(a.clone()).unwrap();
        assert_eq!(state(&a), CommandState::Standby);
    }

    #[test]
    fn test_cancel_lower_on_add() {
        let mut manager = CommandManager::new();
        let low = Scripted::new("low", 1).shared();
        let equal = Scripted::new("equal", 5).shared();
        manager.add(low.clone()).unwrap();
        manager.add(equal.clone()).unwrap();
        manager.update();

        let high = Scripted::new("high", 5)
            .policy(CommandPolicy::new().cancelling_lower_on_add())
            .shared();
        manager.add(high.clone()).unwrap();

        assert_eq!(state(&low), CommandState::Destroyed);
        assert_eq!(state(&equal), CommandState::Executing);
        assert_eq!(state(&high), CommandState::Standby);
    }

    #[test]
    fn test_capacity_evicts_lowest_priority() {
        let mut manager = CommandManager::with_config(&SchedulerConfig::default().with_max_standby(2));
        let a = Scripted::new("a", 3).shared();
        let b = Scripted::new("b", 1).shared();
        let c = Scripted::new("c", 2).shared();
        manager.add(a.clone()).unwrap();
        manager.add(b.clone()).unwrap();
        manager.add(c.clone()).unwrap();

        assert_eq!(manager.standby_count(), 2);
        assert_eq!(state(&b), CommandState::Destroyed);
        assert_eq!(state(&a), CommandState::Standby);
        assert_eq!(state(&c), CommandState::Standby);
    }

    #[test]
    fn test_cancel_commands_threshold_inclusive() {
        let mut manager = CommandManager::new();
        let a = Scripted::new("a", 1).shared();
        let b = Scripted::new("b", 2).shared();
        let c = Scripted::new("c", 3).shared();
        for command in [&a, &b, &c] {
            manager.add(command.clone()).unwrap();
        }
        manager.update();

        assert_eq!(manager.cancel_commands(2), 2);
        assert_eq!(state(&a), CommandState::Destroyed);
        assert_eq!(state(&b), CommandState::Destroyed);
        assert_eq!(state(&c), CommandState::Executing);
    }

    #[test]
    fn test_waits_for_idle() {
        let mut manager = CommandManager::new();
        let busy = Scripted::new("busy", 1).ticks(2).shared();
        manager.add(busy.clone()).unwrap();
        manager.update();

        let polite = Scripted::new("polite", 9)
            .policy(CommandPolicy::new().waiting_for_idle())
            .shared();
        manager.add(polite.clone()).unwrap();

        manager.update();
        assert_eq!(state(&polite), CommandState::Standby);
        assert_eq!(state(&busy), CommandState::Destroyed);

        manager.update();
        assert_eq!(state(&polite), CommandState::Executing);
    }

    #[test]
    fn test_standby_hook_abandons() {
        let mut manager = CommandManager::new();
        let blocker = Scripted::new("blocker", 9)
            .policy(CommandPolicy::new().blocking_standby())
            .shared();
        manager.add(blocker).unwrap();
        manager.update();

        let mut quitter = Scripted::new("quitter", 1);
        quitter.wait = false;
        let quitter = quitter.shared();
        manager.add(quitter.clone()).unwrap();

        manager.update();
        assert_eq!(state(&quitter), CommandState::Destroyed);
        assert_eq!(manager.standby_count(), 0);
    }

    #[test]
    fn test_completed_command_removed() {
        let mut manager = CommandManager::new();
        let quick = Scripted::new("quick", 1).ticks(1).shared();
        manager.add(quick.clone()).unwrap();

        manager.update();
        assert_eq!(state(&quick), CommandState::Destroyed);
        assert_eq!(manager.executing_count(), 0);
    }

    #[test]
    fn test_clear_destroys_everything() {
        let mut manager = CommandManager::new();
        let a = Scripted::new("a", 1).shared();
        let b = Scripted::new("b", 2).shared();
        manager.add(a.clone()).unwrap();
        manager.update();
        manager.add(b.clone()).unwrap();

        manager.clear();
        assert_eq!(state(&a), CommandState::Destroyed);
        assert_eq!(state(&b), CommandState::Destroyed);
        assert_eq!(manager.standby_count() + manager.executing_count(), 0);
    }

    #[test]
    fn test_submitter_applies_on_update() {
        let mut manager = CommandManager::new();
        let submitter = manager.submitter();
        let a = Scripted::new("a", 1).shared();
        submitter.submit(a.clone());
        assert_eq!(state(&a), CommandState::Invalid);

        manager.update();
        assert_eq!(submitter.pending(), 0);
        assert_eq!(state(&a), CommandState::Executing);
    }

    #[test]
    fn test_emits_lifecycle_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut manager = CommandManager::new().with_emitter(OrderedEventEmitter::new(bus));
        let a = Scripted::new("a", 4).ticks(1).shared();
        let handle = manager.add(a).unwrap();
        manager.update();

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|envelope| {
                assert_eq!(envelope.event.command_id(), Some(handle.id()));
                envelope.event.kind()
            })
            .collect();
        assert_eq!(kinds, vec!["command.standby", "command.executing", "command.removed"]);
    }
}
