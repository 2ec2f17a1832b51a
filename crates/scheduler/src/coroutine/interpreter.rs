//! Stack-based step-sequence interpreter.
//!
//! A [`Coroutine`] flattens a tree of nested step sources into a single
//! advance-by-advance contract. Nesting lives on an explicit frame stack
//! rather than the host call stack, so arbitrarily deep composition costs
//! heap, and the most recent yield is always inspectable via
//! [`Coroutine::current`].

use std::fmt;
use std::time::Duration;

use tracing::trace;

use super::step::{PendingOperation, Step, StepSource};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::error::{Result, SchedulerError};

/// The item a coroutine is currently suspended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Yielded {
    /// Plain one-tick suspension.
    Tick,
    /// A named sentinel.
    Signal(String),
    /// A timed wait that has not elapsed yet.
    Waiting,
    /// A pending operation that has not reported done yet.
    Pending,
}

impl Yielded {
    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::Signal(name) => Some(name),
            _ => None,
        }
    }
}

struct TimedWait {
    duration: Duration,
    started: Option<Duration>,
}

impl TimedWait {
    /// Returns true while the wait still has to suspend.
    fn tick(&mut self, clock: &dyn Clock) -> bool {
        let now = clock.now();
        let started = *self.started.get_or_insert(now);
        now.saturating_sub(started) < self.duration
    }
}

enum Frame {
    Nested(Box<Coroutine>),
    Source(Box<dyn StepSource>),
    Pending(Box<dyn PendingOperation>),
    Wait(TimedWait),
}

impl Frame {
    fn rewind(&mut self) {
        match self {
            Frame::Nested(coroutine) => coroutine.reset(),
            Frame::Source(source) => source.rewind(),
            Frame::Wait(wait) => wait.started = None,
            Frame::Pending(_) => {}
        }
    }
}

/// Outcome of evaluating the top frame once.
enum Eval {
    Suspend(Yielded),
    Exhausted,
    Push(Frame),
}

pub struct Coroutine {
    stack: Vec<Frame>,
    current: Option<Yielded>,
    done: bool,
    error: Option<SchedulerError>,
    clock: SharedClock,
}

impl Coroutine {
    /// Create a coroutine over `root`, timing waits with the system clock.
    pub fn new(root: impl Into<Step>) -> Self {
        Self::with_clock(root, SystemClock::shared())
    }

    pub fn with_clock(root: impl Into<Step>, clock: SharedClock) -> Self {
        let mut coroutine = Self {
            stack: Vec::new(),
            current: None,
            done: false,
            error: None,
            clock,
        };
        match Self::interpret(root.into()) {
            Ok(Eval::Push(frame)) => coroutine.stack.push(frame),
            // A bare leaf root behaves like a one-element list.
            Ok(Eval::Suspend(Yielded::Tick)) => {
                coroutine.stack.push(Frame::Source(Box::new(Once(Some(Step::Tick)))));
            }
            Ok(Eval::Suspend(Yielded::Signal(name))) => {
                coroutine.stack.push(Frame::Source(Box::new(Once(Some(Step::Signal(name))))));
            }
            Ok(_) => {}
            Err(err) => coroutine.fail(err),
        }
        coroutine
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = clock;
    }

    /// Advance to the next step. Returns true while more steps remain.
    ///
    /// Errors raised by any frame are captured: the coroutine is marked done
    /// and the error is available from [`error`](Self::error).
    pub fn advance(&mut self) -> bool {
        let clock = self.clock.clone();
        self.resume(clock.as_ref())
    }

    /// Advance using the caller's clock. Nested coroutines share the clock of
    /// the coroutine that owns them.
    pub(crate) fn resume(&mut self, clock: &dyn Clock) -> bool {
        if self.done {
            return false;
        }
        match self.step(clock) {
            Ok(more) => {
                if !more {
                    self.done = true;
                    self.current = None;
                }
                more
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn step(&mut self, clock: &dyn Clock) -> Result<bool> {
        loop {
            let depth = self.stack.len();
            let Some(top) = self.stack.last_mut() else {
                return Ok(false);
            };

            match Self::evaluate(top, clock)? {
                Eval::Suspend(yielded) => {
                    self.current = Some(yielded);
                    return Ok(true);
                }
                Eval::Push(frame) => {
                    trace!(depth = depth + 1, "Pushing frame");
                    self.stack.push(frame);
                }
                Eval::Exhausted => {
                    // The root frame stays on the stack so reset can rewind it.
                    if depth == 1 {
                        return Ok(false);
                    }
                    self.stack.pop();
                }
            }
        }
    }

    fn evaluate(frame: &mut Frame, clock: &dyn Clock) -> Result<Eval> {
        match frame {
            Frame::Nested(nested) => {
                if nested.resume(clock) {
                    let yielded = nested.current.take().unwrap_or(Yielded::Tick);
                    Ok(Eval::Suspend(yielded))
                } else if let Some(err) = nested.error.take() {
                    Err(err)
                } else {
                    Ok(Eval::Exhausted)
                }
            }
            Frame::Source(source) => match source.next_step()? {
                None => Ok(Eval::Exhausted),
                Some(step) => Self::interpret(step),
            },
            Frame::Pending(operation) => {
                if operation.is_done()? {
                    Ok(Eval::Exhausted)
                } else {
                    Ok(Eval::Suspend(Yielded::Pending))
                }
            }
            Frame::Wait(wait) => {
                if wait.tick(clock) {
                    Ok(Eval::Suspend(Yielded::Waiting))
                } else {
                    Ok(Eval::Exhausted)
                }
            }
        }
    }

    /// Decide what a freshly yielded step does: leaves suspend, step
    /// sources become new frames.
    fn interpret(step: Step) -> Result<Eval> {
        let frame = match step {
            Step::Tick => return Ok(Eval::Suspend(Yielded::Tick)),
            Step::Signal(name) => return Ok(Eval::Suspend(Yielded::Signal(name))),
            Step::Opaque { kind, .. } => return Err(SchedulerError::UnsupportedStepKind(kind)),
            Step::Nested(coroutine) => Frame::Nested(coroutine),
            Step::Source(source) => Frame::Source(source),
            Step::Pending(operation) => Frame::Pending(operation),
            Step::Wait(duration) => Frame::Wait(TimedWait {
                duration,
                started: None,
            }),
        };
        Ok(Eval::Push(frame))
    }

    fn fail(&mut self, err: SchedulerError) {
        self.done = true;
        self.current = None;
        self.error = Some(err);
    }

    /// Restore the stack to just the root source and clear the done flag.
    ///
    /// A captured error from a previous run is kept.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
        if let Some(root) = self.stack.first_mut() {
            root.rewind();
        }
        self.current = None;
        self.done = false;
    }

    /// The item the coroutine is suspended on, if any.
    pub fn current(&self) -> Option<&Yielded> {
        self.current.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn error(&self) -> Option<&SchedulerError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<SchedulerError> {
        self.error.take()
    }

    /// Current nesting depth, root included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("depth", &self.stack.len())
            .field("current", &self.current)
            .field("done", &self.done)
            .field("error", &self.error)
            .finish()
    }
}

/// Single-step source wrapping a leaf root.
struct Once(Option<Step>);

impl StepSource for Once {
    fn next_step(&mut self) -> Result<Option<Step>> {
        Ok(self.0.take())
    }
}
