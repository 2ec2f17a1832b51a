//! Step kinds understood by the interpreter.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::interpreter::Coroutine;
use crate::error::{Result, SchedulerError};

/// One item yielded by a step source.
pub enum Step {
    /// Suspend for one tick without surfacing a value.
    Tick,
    /// Named sentinel surfaced through [`Coroutine::current`].
    Signal(String),
    /// Sub-sequence run to completion before the parent continues.
    Nested(Box<Coroutine>),
    /// Hand-written generator.
    Source(Box<dyn StepSource>),
    /// Suspend until the clock has advanced by at least this much.
    Wait(Duration),
    /// Suspend until the operation reports done.
    Pending(Box<dyn PendingOperation>),
    /// Payload the interpreter has no rule for.
    Opaque {
        kind: &'static str,
        payload: Box<dyn Any>,
    },
}

impl Step {
    pub fn signal(name: impl Into<String>) -> Self {
        Self::Signal(name.into())
    }

    pub fn wait(duration: Duration) -> Self {
        Self::Wait(duration)
    }

    pub fn wait_ms(millis: u64) -> Self {
        Self::Wait(Duration::from_millis(millis))
    }

    pub fn nested(coroutine: Coroutine) -> Self {
        Self::Nested(Box::new(coroutine))
    }

    pub fn source(source: impl StepSource + 'static) -> Self {
        Self::Source(Box::new(source))
    }

    pub fn pending(operation: impl PendingOperation + 'static) -> Self {
        Self::Pending(Box::new(operation))
    }

    /// Wrap a value the interpreter cannot evaluate. Advancing onto it fails
    /// the sequence with [`SchedulerError::UnsupportedStepKind`].
    pub fn opaque<T: Any>(value: T) -> Self {
        Self::Opaque {
            kind: type_name::<T>(),
            payload: Box::new(value),
        }
    }

    /// A source whose state is rebuilt from `factory` whenever the owning
    /// coroutine is reset.
    pub fn restartable<F>(factory: F) -> Self
    where
        F: FnMut() -> Step + 'static,
    {
        Self::source(Restartable::new(factory))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Signal(_) => "signal",
            Self::Nested(_) => "nested",
            Self::Source(_) => "source",
            Self::Wait(_) => "wait",
            Self::Pending(_) => "pending",
            Self::Opaque { kind, .. } => *kind,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => f.debug_tuple("Signal").field(name).finish(),
            Self::Wait(duration) => f.debug_tuple("Wait").field(duration).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<Coroutine> for Step {
    fn from(coroutine: Coroutine) -> Self {
        Self::nested(coroutine)
    }
}

impl From<Duration> for Step {
    fn from(duration: Duration) -> Self {
        Self::Wait(duration)
    }
}

impl From<&str> for Step {
    fn from(name: &str) -> Self {
        Self::signal(name)
    }
}

/// Anything that can be asked for its next step.
pub trait StepSource {
    /// `Ok(None)` once exhausted.
    fn next_step(&mut self) -> Result<Option<Step>>;

    /// Called when the owning coroutine is reset with this source as root.
    fn rewind(&mut self) {}
}

/// In-flight work polled by the interpreter, such as an asynchronous load.
pub trait PendingOperation {
    /// `Ok(true)` once finished. An error fails the waiting sequence.
    fn is_done(&mut self) -> Result<bool>;
}

/// Fixed list of steps, yielded front to back.
pub struct StepList {
    steps: VecDeque<Step>,
}

impl StepSource for StepList {
    fn next_step(&mut self) -> Result<Option<Step>> {
        Ok(self.steps.pop_front())
    }
}

/// Build a step source from a list of steps.
pub fn steps<I>(items: I) -> Step
where
    I: IntoIterator,
    I::Item: Into<Step>,
{
    Step::source(StepList {
        steps: items.into_iter().map(Into::into).collect(),
    })
}

struct FnSource<F> {
    next: F,
}

impl<F> StepSource for FnSource<F>
where
    F: FnMut() -> Result<Option<Step>>,
{
    fn next_step(&mut self) -> Result<Option<Step>> {
        (self.next)()
    }
}

/// Build a step source from a closure called once per requested step.
pub fn from_fn<F>(next: F) -> Step
where
    F: FnMut() -> Result<Option<Step>> + 'static,
{
    Step::source(FnSource { next })
}

struct Restartable<F> {
    factory: F,
    current: Option<Step>,
    inner: Option<Box<dyn StepSource>>,
}

impl<F> Restartable<F>
where
    F: FnMut() -> Step,
{
    fn new(mut factory: F) -> Self {
        let current = Some(factory());
        Self {
            factory,
            current,
            inner: None,
        }
    }
}

impl<F> StepSource for Restartable<F>
where
    F: FnMut() -> Step,
{
    fn next_step(&mut self) -> Result<Option<Step>> {
        if let Some(inner) = self.inner.as_mut() {
            return inner.next_step();
        }
        match self.current.take() {
            // Unwrap plain sources so their steps surface directly.
            Some(Step::Source(inner)) => {
                self.inner = Some(inner);
                self.next_step()
            }
            other => Ok(other),
        }
    }

    fn rewind(&mut self) {
        self.inner = None;
        self.current = Some((self.factory)());
    }
}

#[derive(Debug, Default)]
enum PendingState {
    #[default]
    Running,
    Done,
    Failed(String),
}

/// Shared completion flag usable as a [`PendingOperation`].
///
/// Clones observe the same state; the producer side keeps one clone and
/// calls [`complete`](Self::complete) or [`fail`](Self::fail).
#[derive(Debug, Clone, Default)]
pub struct PendingHandle {
    state: Rc<RefCell<PendingState>>,
}

impl PendingHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        *self.state.borrow_mut() = PendingState::Done;
    }

    pub fn fail(&self, reason: impl Into<String>) {
        *self.state.borrow_mut() = PendingState::Failed(reason.into());
    }

    pub fn is_finished(&self) -> bool {
        !matches!(*self.state.borrow(), PendingState::Running)
    }
}

impl PendingOperation for PendingHandle {
    fn is_done(&mut self) -> Result<bool> {
        match &*self.state.borrow() {
            PendingState::Running => Ok(false),
            PendingState::Done => Ok(true),
            PendingState::Failed(reason) => Err(SchedulerError::step_failed(reason.clone())),
        }
    }
}
