//! Task dispatcher with deferred registration.
//!
//! Structural changes (register, unregister) are buffered in a shared
//! registry and applied at the start of each dispatch pass, so tasks can
//! register or kill other tasks while the dispatcher is iterating.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use cadence_core::{ExecutionOrder, TaskStatus, UpdatePhase};
use events::Event;
use tracing::{debug, error, warn};

use super::task::{task_key, TaskRef};
use crate::emitter::{emit, OrderedEventEmitter};
use crate::error::{Result, SchedulerError};

struct PendingEntry {
    key: usize,
    task: TaskRef,
    order: ExecutionOrder,
    name: String,
}

struct CommittedMeta {
    order: ExecutionOrder,
    status: TaskStatus,
    name: String,
}

#[derive(Default)]
struct Registry {
    pending: Vec<PendingEntry>,
    committed: HashMap<usize, CommittedMeta>,
}

impl Registry {
    fn is_live(&self, key: usize) -> bool {
        self.pending.iter().any(|p| p.key == key)
            || self
                .committed
                .get(&key)
                .is_some_and(|meta| meta.status == TaskStatus::Active)
    }

    fn status(&self, key: usize) -> Option<TaskStatus> {
        self.committed.get(&key).map(|meta| meta.status)
    }
}

/// Clonable registration handle.
///
/// Changes made through any handle become visible at the next dispatch pass.
#[derive(Clone, Default)]
pub struct TaskHandle {
    registry: Rc<RefCell<Registry>>,
}

impl TaskHandle {
    /// Queue a task for the next commit pass.
    ///
    /// Registering a task that is already registered or pending is rejected.
    pub fn register(&self, task: TaskRef, order: ExecutionOrder) -> Result<()> {
        let key = task_key(&task);
        let name = task_name(&task);
        let mut registry = self.registry.borrow_mut();

        if registry.is_live(key) {
            warn!(task = %name, execution_order = %order, "Task already registered");
            return Err(SchedulerError::TaskAlreadyRegistered(name));
        }

        debug!(task = %name, execution_order = %order, "Task queued for registration");
        registry.pending.push(PendingEntry {
            key,
            task,
            order,
            name,
        });
        Ok(())
    }

    /// Remove a task. A committed task is marked killed and skipped from
    /// now on; a pending one is dropped before it ever runs.
    pub fn unregister(&self, task: &TaskRef) -> bool {
        let key = task_key(task);
        let mut registry = self.registry.borrow_mut();

        if let Some(index) = registry.pending.iter().position(|p| p.key == key) {
            let entry = registry.pending.remove(index);
            debug!(task = %entry.name, "Pending task dropped");
            return true;
        }

        match registry.committed.get_mut(&key) {
            Some(meta) if meta.status == TaskStatus::Active => {
                meta.status = TaskStatus::Killed;
                debug!(task = %meta.name, execution_order = %meta.order, "Task killed");
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, task: &TaskRef) -> bool {
        self.registry.borrow().is_live(task_key(task))
    }
}

fn task_name(task: &TaskRef) -> String {
    match task.try_borrow() {
        Ok(task) => task.name().to_string(),
        Err(_) => "<busy>".to_string(),
    }
}

struct GroupEntry {
    key: usize,
    task: TaskRef,
}

/// Runs tasks in ascending execution-order groups, registration order
/// within a group.
pub struct TaskDispatcher {
    groups: BTreeMap<ExecutionOrder, Vec<GroupEntry>>,
    handle: TaskHandle,
    emitter: Option<OrderedEventEmitter>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
            handle: TaskHandle::default(),
            emitter: None,
        }
    }

    pub fn with_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn register(&self, task: TaskRef, order: ExecutionOrder) -> Result<()> {
        self.handle.register(task, order)
    }

    pub fn unregister(&self, task: &TaskRef) -> bool {
        self.handle.unregister(task)
    }

    pub fn is_registered(&self, task: &TaskRef) -> bool {
        self.handle.is_registered(task)
    }

    /// Committed tasks that are still active.
    pub fn task_count(&self) -> usize {
        self.handle
            .registry
            .borrow()
            .committed
            .values()
            .filter(|meta| meta.status == TaskStatus::Active)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.handle.registry.borrow().pending.len()
    }

    pub fn update(&mut self) {
        self.dispatch(UpdatePhase::Update);
    }

    pub fn late_update(&mut self) {
        self.dispatch(UpdatePhase::LateUpdate);
    }

    pub fn fixed_update(&mut self) {
        self.dispatch(UpdatePhase::FixedUpdate);
    }

    /// Purge killed tasks, then commit pending registrations.
    fn commit(&mut self) {
        let mut registry = self.handle.registry.borrow_mut();

        let killed: Vec<usize> = registry
            .committed
            .iter()
            .filter(|(_, meta)| meta.status == TaskStatus::Killed)
            .map(|(key, _)| *key)
            .collect();
        for key in killed {
            let Some(meta) = registry.committed.remove(&key) else {
                continue;
            };
            if let Some(group) = self.groups.get_mut(&meta.order) {
                group.retain(|entry| entry.key != key);
                if group.is_empty() {
                    self.groups.remove(&meta.order);
                }
            }
            emit(
                &self.emitter,
                Event::TaskUnregistered {
                    name: meta.name,
                    execution_order: meta.order.value(),
                },
            );
        }

        let pending = std::mem::take(&mut registry.pending);
        for entry in pending {
            self.groups.entry(entry.order).or_default().push(GroupEntry {
                key: entry.key,
                task: entry.task,
            });
            emit(
                &self.emitter,
                Event::TaskRegistered {
                    name: entry.name.clone(),
                    execution_order: entry.order.value(),
                },
            );
            registry.committed.insert(
                entry.key,
                CommittedMeta {
                    order: entry.order,
                    status: TaskStatus::Active,
                    name: entry.name,
                },
            );
        }
    }

    fn dispatch(&mut self, phase: UpdatePhase) {
        self.commit();

        for (order, group) in &self.groups {
            for entry in group {
                // Killed mid-pass by an earlier task.
                if self.handle.registry.borrow().status(entry.key) != Some(TaskStatus::Active) {
                    continue;
                }

                let Ok(mut task) = entry.task.try_borrow_mut() else {
                    warn!(execution_order = %order, phase = phase.as_str(), "Task busy, skipped");
                    continue;
                };
                if !task.is_active() || !task.supports(phase) {
                    continue;
                }

                if let Err(e) = task.update(phase) {
                    error!(
                        task = task.name(),
                        execution_order = %order,
                        phase = phase.as_str(),
                        error = %e,
                        "Task update failed"
                    );
                    emit(
                        &self.emitter,
                        Event::Error {
                            message: e.to_string(),
                            context: Some(format!("task {}", task.name())),
                        },
                    );
                }
            }
        }
    }
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("tasks", &self.task_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Task;
    use events::EventBus;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: String,
        log: Log,
        phases: Vec<UpdatePhase>,
        active: bool,
    }

    impl Recorder {
        fn new(name: &str, log: &Log) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                name: name.to_string(),
                log: log.clone(),
                phases: vec![UpdatePhase::Update],
                active: true,
            }))
        }
    }

    impl Task for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_active(&self) -> bool {
            self.active
        }

        fn supports(&self, phase: UpdatePhase) -> bool {
            self.phases.contains(&phase)
        }

        fn update(&mut self, phase: UpdatePhase) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("{}:{}", self.name, phase.as_str()));
            Ok(())
        }
    }

    struct Failing;

    impl Task for Failing {
        fn update(&mut self, _phase: UpdatePhase) -> Result<()> {
            Err(SchedulerError::step_failed("boom"))
        }
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    #[test]
    fn test_groups_run_in_ascending_order() {
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new();
        dispatcher
            .register(Recorder::new("late", &log), ExecutionOrder::LATE)
            .unwrap();
        dispatcher
            .register(Recorder::new("first", &log), ExecutionOrder::DEFAULT)
            .unwrap();
        dispatcher
            .register(Recorder::new("early", &log), ExecutionOrder::EARLY)
            .unwrap();
        dispatcher
            .register(Recorder::new("second", &log), ExecutionOrder::DEFAULT)
            .unwrap();

        assert_eq!(dispatcher.pending_count(), 4);
        dispatcher.update();
        assert_eq!(dispatcher.task_count(), 4);
        assert_eq!(
            take(&log),
            vec!["early:update", "first:update", "second:update", "late:update"]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let log = Log::default();
        let dispatcher = TaskDispatcher::new();
        let task = Recorder::new("a", &log);

        dispatcher.register(task.clone(), ExecutionOrder::DEFAULT).unwrap();
        let err = dispatcher
            .register(task.clone(), ExecutionOrder::LATE)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TaskAlreadyRegistered(name) if name == "a"));
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[test]
    fn test_unregister_pending_never_runs() {
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new();
        let task: TaskRef = Recorder::new("a", &log);

        dispatcher.register(task.clone(), ExecutionOrder::DEFAULT).unwrap();
        assert!(dispatcher.unregister(&task));
        dispatcher.update();

        assert!(take(&log).is_empty());
        assert!(!dispatcher.is_registered(&task));
    }

    #[test]
    fn test_phase_filtering_and_inactive() {
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new();

        let physics = Recorder::new("physics", &log);
        physics.borrow_mut().phases = vec![UpdatePhase::FixedUpdate];
        let camera = Recorder::new("camera", &log);
        camera.borrow_mut().phases = vec![UpdatePhase::Update, UpdatePhase::LateUpdate];
        let idle = Recorder::new("idle", &log);
        idle.borrow_mut().active = false;

        dispatcher.register(physics, ExecutionOrder::DEFAULT).unwrap();
        dispatcher.register(camera, ExecutionOrder::DEFAULT).unwrap();
        dispatcher.register(idle, ExecutionOrder::DEFAULT).unwrap();

        dispatcher.update();
        dispatcher.late_update();
        dispatcher.fixed_update();

        assert_eq!(
            take(&log),
            vec!["camera:update", "camera:late_update", "physics:fixed_update"]
        );
    }

    #[test]
    fn test_failing_task_does_not_stop_pass() {
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new();
        dispatcher
            .register(Rc::new(RefCell::new(Failing)), ExecutionOrder::EARLY)
            .unwrap();
        dispatcher
            .register(Recorder::new("after", &log), ExecutionOrder::DEFAULT)
            .unwrap();

        dispatcher.update();
        assert_eq!(take(&log), vec!["after:update"]);
    }

    #[test]
    fn test_reregister_after_kill() {
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new();
        let task: TaskRef = Recorder::new("a", &log);

        dispatcher.register(task.clone(), ExecutionOrder::DEFAULT).unwrap();
        dispatcher.update();
        assert!(dispatcher.unregister(&task));
        assert!(!dispatcher.unregister(&task));

        dispatcher.register(task.clone(), ExecutionOrder::LATE).unwrap();
        dispatcher.update();
        assert_eq!(take(&log), vec!["a:update", "a:update"]);
        assert_eq!(dispatcher.task_count(), 1);
    }

    #[test]
    fn test_emits_registration_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let log = Log::default();
        let mut dispatcher = TaskDispatcher::new().with_emitter(OrderedEventEmitter::new(bus));
        let task: TaskRef = Recorder::new("a", &log);

        dispatcher.register(task.clone(), ExecutionOrder::LATE).unwrap();
        dispatcher.update();
        dispatcher.unregister(&task);
        dispatcher.update();

        assert_eq!(
            rx.try_recv().unwrap().event,
            Event::TaskRegistered {
                name: "a".to_string(),
                execution_order: 100
            }
        );
        assert_eq!(
            rx.try_recv().unwrap().event,
            Event::TaskUnregistered {
                name: "a".to_string(),
                execution_order: 100
            }
        );
    }
}
