//! Sequence runner: advances many coroutines once per tick.
//!
//! Each tracked sequence ends in exactly one of three outcomes (completed,
//! canceled, failed). Once an outcome is delivered the callbacks are dropped,
//! so nothing can fire twice and captured state is released promptly.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use cadence_core::{SequenceOutcome, UpdatePhase};
use events::Event;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use super::interpreter::Coroutine;
use super::step::Step;
use crate::clock::{SharedClock, SystemClock};
use crate::dispatch::Task;
use crate::emitter::{emit, OrderedEventEmitter};
use crate::error::{Result, SchedulerError};

type Callback = Box<dyn FnOnce()>;
type ErrorCallback = Box<dyn FnOnce(SchedulerError)>;

/// Identifies a sequence submitted to a [`SequenceRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceHandle(Uuid);

impl SequenceHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// Callbacks and cancellation linkage for a submitted sequence.
#[derive(Default)]
pub struct StartOptions {
    name: Option<String>,
    on_completed: Option<Callback>,
    on_canceled: Option<Callback>,
    on_error: Option<ErrorCallback>,
    cancellation: Option<CancellationToken>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs and notifications.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_on_completed(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_completed = Some(Box::new(callback));
        self
    }

    pub fn with_on_canceled(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_canceled = Some(Box::new(callback));
        self
    }

    /// Without an error callback, failures are logged and the runner moves on.
    pub fn with_on_error(mut self, callback: impl FnOnce(SchedulerError) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartOptions")
            .field("name", &self.name)
            .field("on_completed", &self.on_completed.is_some())
            .field("on_canceled", &self.on_canceled.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

struct Callbacks {
    on_completed: Option<Callback>,
    on_canceled: Option<Callback>,
    on_error: Option<ErrorCallback>,
}

struct TrackedSequence {
    handle: SequenceHandle,
    name: Option<String>,
    coroutine: Coroutine,
    callbacks: Option<Callbacks>,
    cancellation: Option<CancellationToken>,
}

impl TrackedSequence {
    fn new(handle: SequenceHandle, coroutine: Coroutine, options: StartOptions) -> Self {
        Self {
            handle,
            name: options.name,
            coroutine,
            callbacks: Some(Callbacks {
                on_completed: options.on_completed,
                on_canceled: options.on_canceled,
                on_error: options.on_error,
            }),
            cancellation: options.cancellation,
        }
    }

    fn is_cancel_requested(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Deliver the terminal outcome. Only the first call has any effect.
    fn finish(
        &mut self,
        outcome: SequenceOutcome,
        emitter: &Option<OrderedEventEmitter>,
    ) -> bool {
        let Some(callbacks) = self.callbacks.take() else {
            return false;
        };
        self.cancellation = None;

        let mut message = None;
        match outcome {
            SequenceOutcome::Completed => {
                debug!(sequence_id = %self.handle.id(), name = ?self.name, "Sequence completed");
                if let Some(callback) = callbacks.on_completed {
                    callback();
                }
            }
            SequenceOutcome::Canceled => {
                debug!(sequence_id = %self.handle.id(), name = ?self.name, "Sequence canceled");
                if let Some(callback) = callbacks.on_canceled {
                    callback();
                }
            }
            SequenceOutcome::Failed => {
                let err = self
                    .coroutine
                    .take_error()
                    .unwrap_or_else(|| SchedulerError::step_failed("unknown failure"));
                message = Some(err.to_string());
                match callbacks.on_error {
                    Some(callback) => callback(err),
                    None => error!(
                        sequence_id = %self.handle.id(),
                        name = ?self.name,
                        error = %err,
                        "Sequence failed"
                    ),
                }
            }
        }

        emit(
            emitter,
            Event::SequenceFinished {
                sequence_id: self.handle.id(),
                name: self.name.clone(),
                outcome,
                error: message,
            },
        );
        true
    }
}

enum Request {
    Start(SequenceHandle, Step, StartOptions),
    Stop(SequenceHandle),
}

/// Clonable handle for starting and stopping sequences from code that
/// cannot borrow the runner, such as a callback or a task being updated.
///
/// Requests are applied at the beginning of the runner's next `update`.
#[derive(Clone, Default)]
pub struct SequenceSpawner {
    queue: Rc<RefCell<Vec<Request>>>,
}

impl SequenceSpawner {
    pub fn start(&self, root: impl Into<Step>, options: StartOptions) -> SequenceHandle {
        let handle = SequenceHandle::new();
        self.queue
            .borrow_mut()
            .push(Request::Start(handle, root.into(), options));
        handle
    }

    pub fn stop(&self, handle: SequenceHandle) {
        self.queue.borrow_mut().push(Request::Stop(handle));
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.borrow().len()
    }
}

/// Owns many step sequences and advances each once per tick, in submission
/// order.
pub struct SequenceRunner {
    entries: Vec<TrackedSequence>,
    clock: SharedClock,
    spawner: SequenceSpawner,
    emitter: Option<OrderedEventEmitter>,
}

impl SequenceRunner {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Vec::new(),
            clock,
            spawner: SequenceSpawner::default(),
            emitter: None,
        }
    }

    pub fn with_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn spawner(&self) -> SequenceSpawner {
        self.spawner.clone()
    }

    /// Submit a sequence. An already-signaled cancellation token cancels it
    /// immediately, without a single advance.
    pub fn start(&mut self, root: impl Into<Step>, options: StartOptions) -> SequenceHandle {
        let handle = SequenceHandle::new();
        self.admit(handle, root.into(), options);
        handle
    }

    fn track(&self, handle: SequenceHandle, root: Step, options: StartOptions) -> TrackedSequence {
        let coroutine = Coroutine::with_clock(root, self.clock.clone());
        let entry = TrackedSequence::new(handle, coroutine, options);
        emit(
            &self.emitter,
            Event::SequenceStarted {
                sequence_id: handle.id(),
                name: entry.name.clone(),
            },
        );
        entry
    }

    fn admit(&mut self, handle: SequenceHandle, root: Step, options: StartOptions) {
        let mut entry = self.track(handle, root, options);
        if entry.is_cancel_requested() {
            entry.finish(SequenceOutcome::Canceled, &self.emitter);
            return;
        }
        self.entries.push(entry);
    }

    /// Cancel a start still waiting in the spawner queue.
    fn cancel_queued(&mut self, handle: SequenceHandle) -> bool {
        let queued = {
            let mut queue = self.spawner.queue.borrow_mut();
            queue
                .iter()
                .position(|r| matches!(r, Request::Start(h, ..) if *h == handle))
                .map(|i| queue.remove(i))
        };
        match queued {
            Some(Request::Start(handle, root, options)) => {
                self.track(handle, root, options)
                    .finish(SequenceOutcome::Canceled, &self.emitter)
            }
            _ => false,
        }
    }

    /// Cancel one sequence, tracked or still queued through a spawner.
    /// No-op if it already reached an outcome.
    pub fn stop(&mut self, handle: SequenceHandle) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.handle == handle) else {
            return self.cancel_queued(handle);
        };
        let mut entry = self.entries.remove(index);
        entry.finish(SequenceOutcome::Canceled, &self.emitter)
    }

    /// Cancel every sequence, newest first, then clear the set. Starts still
    /// queued through a spawner are newer than any tracked entry and go
    /// first; queued stops are dropped.
    pub fn stop_all(&mut self) {
        let queued = std::mem::take(&mut *self.spawner.queue.borrow_mut());
        for request in queued.into_iter().rev() {
            if let Request::Start(handle, root, options) = request {
                self.track(handle, root, options)
                    .finish(SequenceOutcome::Canceled, &self.emitter);
            }
        }
        while let Some(mut entry) = self.entries.pop() {
            entry.finish(SequenceOutcome::Canceled, &self.emitter);
        }
    }

    pub fn dispose(&mut self) {
        self.stop_all();
    }

    pub fn is_running(&self, handle: SequenceHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn apply_requests(&mut self) {
        let requests = std::mem::take(&mut *self.spawner.queue.borrow_mut());
        for request in requests {
            match request {
                Request::Start(handle, root, options) => self.admit(handle, root, options),
                Request::Stop(handle) => {
                    self.stop(handle);
                }
            }
        }
    }

    /// Advance every tracked sequence once.
    ///
    /// Finished entries are removed after the pass, in reverse index order.
    pub fn update(&mut self) {
        self.apply_requests();

        let mut finished = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.is_cancel_requested() {
                entry.finish(SequenceOutcome::Canceled, &self.emitter);
                finished.push(index);
                continue;
            }

            if entry.coroutine.advance() {
                continue;
            }

            let outcome = if entry.coroutine.error().is_some() {
                SequenceOutcome::Failed
            } else {
                SequenceOutcome::Completed
            };
            entry.finish(outcome, &self.emitter);
            finished.push(index);
        }

        for index in finished.into_iter().rev() {
            self.entries.remove(index);
        }
    }
}

impl Default for SequenceRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequenceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceRunner")
            .field("active", &self.entries.len())
            .field("queued", &self.spawner.pending_requests())
            .finish()
    }
}

impl Task for SequenceRunner {
    fn name(&self) -> &str {
        "sequence_runner"
    }

    fn update(&mut self, _phase: UpdatePhase) -> Result<()> {
        SequenceRunner::update(self);
        Ok(())
    }
}
