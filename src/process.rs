//! Processes: suspendable computations driven by the environment.
//!
//! A computation is an explicit resumable state machine. The environment
//! calls [`Computation::resume`] with whatever the last awaited event
//! delivered; the computation answers with a [`Step`]: wait on something
//! else, return a value, or fail. Between two resumes the process is
//! parked on exactly one event.
//!
//! # Example
//!
//! ```rust
//! use tempo::{Environment, Resume, SimResult, Step, Until, Value};
//!
//! let mut env = Environment::new();
//! let mut started = false;
//! env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
//!     if !started {
//!         started = true;
//!         return Ok(Step::wait(env.timeout_with(1.0, 42)?));
//!     }
//!     let value = input.into_result().unwrap_or_default();
//!     assert_eq!(value, Value::Int(42));
//!     Ok(Step::done())
//! })
//! .unwrap();
//! env.run(Until::Exhausted).unwrap();
//! assert_eq!(env.now().as_f64(), 1.0);
//! ```

use crate::environment::Environment;
use crate::error::SimResult;
use crate::event::EventId;
use crate::value::{Failure, Outcome, Value};

// ── Process ID ────────────────────────────────────────────────────────

/// Identifier of a process within its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessId(u64);

impl ProcessId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        ProcessId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P#{}", self.0)
    }
}

// ── Resume / Step / Awaitable ─────────────────────────────────────────

/// What a computation is resumed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First resume, right after the process was spawned.
    Start,
    /// The awaited event succeeded with this value.
    Value(Value),
    /// The awaited event failed, or the process was interrupted.
    Failed(Failure),
}

impl Resume {
    /// `Start` reads as an empty value.
    pub fn into_result(self) -> Outcome {
        match self {
            Resume::Start => Ok(Value::Empty),
            Resume::Value(v) => Ok(v),
            Resume::Failed(f) => Err(f),
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Resume::Start)
    }
}

impl From<Outcome> for Resume {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(v) => Resume::Value(v),
            Err(f) => Resume::Failed(f),
        }
    }
}

/// Something a process can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaitable {
    /// A timeout or a plain event.
    Event(EventId),
    /// Another process's completion.
    Completion(ProcessId),
}

impl From<EventId> for Awaitable {
    fn from(id: EventId) -> Self {
        Awaitable::Event(id)
    }
}

impl From<ProcessId> for Awaitable {
    fn from(id: ProcessId) -> Self {
        Awaitable::Completion(id)
    }
}

/// A computation's answer to a resume.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Park until the awaitable is processed.
    Wait(Awaitable),
    /// Terminate successfully.
    Return(Value),
    /// Terminate with a failure.
    Fail(Failure),
}

impl Step {
    pub fn wait(on: impl Into<Awaitable>) -> Self {
        Step::Wait(on.into())
    }

    pub fn ret(value: impl Into<Value>) -> Self {
        Step::Return(value.into())
    }

    /// Terminate with no value.
    pub fn done() -> Self {
        Step::Return(Value::Empty)
    }

    pub fn fail(failure: Failure) -> Self {
        Step::Fail(failure)
    }
}

impl From<Outcome> for Step {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(v) => Step::Return(v),
            Err(f) => Step::Fail(f),
        }
    }
}

// ── Computation ───────────────────────────────────────────────────────

/// A suspendable unit of simulated behaviour.
///
/// # Contract
///
/// Implementations **must**:
/// - Keep their own position between resumes (the kernel does not).
/// - Route all scheduling through the `env` they are handed.
/// - Be deterministic for equal inputs; randomness comes from an injected,
///   seeded generator.
///
/// Returning `Err(SimError)` signals misuse of the kernel (a negative
/// delay, a double trigger, ...) and aborts the current `run`.
pub trait Computation {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step>;
}

/// A computation backed by a closure. Handy for tests and small models.
impl<F> Computation for F
where
    F: FnMut(&mut Environment, Resume) -> SimResult<Step>,
{
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        (self)(env, input)
    }
}

// ── Process record ────────────────────────────────────────────────────

/// Lifecycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessState {
    /// Registered, first resume not yet started.
    Created,
    /// Inside `resume`.
    Running,
    /// Parked on an event.
    Waiting,
    /// Returned a value.
    Completed,
    /// Terminated with a failure.
    Failed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Failed)
    }
}

/// Kernel-side bookkeeping for one process.
pub struct Process {
    pub id: ProcessId,
    pub name: Option<String>,
    /// Fires once with the computation's result.
    pub completion: EventId,
    /// The event the process is parked on.
    pub target: Option<EventId>,
    pub state: ProcessState,
    /// Taken out while the computation runs; dropped once it terminates.
    pub(crate) computation: Option<Box<dyn Computation>>,
}

impl Process {
    pub(crate) fn new(
        id: ProcessId,
        name: Option<String>,
        completion: EventId,
        computation: Box<dyn Computation>,
    ) -> Self {
        Process {
            id,
            name,
            completion,
            target: None,
            state: ProcessState::Created,
            computation: Some(computation),
        }
    }

    /// Name for logs: the given name, or the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.id, name),
            None => self.id.to_string(),
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("completion", &self.completion)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_conversions() {
        assert_eq!(Resume::Start.into_result(), Ok(Value::Empty));
        assert_eq!(Resume::from(Ok(Value::Int(1))), Resume::Value(Value::Int(1)));
        assert_eq!(
            Resume::from(Err(Failure::raised("x"))).into_result(),
            Err(Failure::raised("x"))
        );
        assert!(Resume::Start.is_start());
    }

    #[test]
    fn test_step_helpers() {
        assert_eq!(Step::done(), Step::Return(Value::Empty));
        assert_eq!(Step::ret(7i64), Step::Return(Value::Int(7)));
        assert_eq!(
            Step::wait(EventId::new(3)),
            Step::Wait(Awaitable::Event(EventId::new(3)))
        );
        assert_eq!(
            Step::wait(ProcessId::new(1)),
            Step::Wait(Awaitable::Completion(ProcessId::new(1)))
        );
        assert_eq!(Step::from(Err(Failure::raised("e"))), Step::Fail(Failure::raised("e")));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProcessState::Completed.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
        assert!(!ProcessState::Waiting.is_terminal());
        assert!(!ProcessState::Created.is_terminal());
    }

    #[test]
    fn test_label() {
        let noop = |_: &mut Environment, _: Resume| -> SimResult<Step> { Ok(Step::done()) };
        let p = Process::new(ProcessId::new(4), Some("router".into()), EventId::new(9), Box::new(noop));
        assert_eq!(p.label(), "P#4:router");
        assert_eq!(format!("{}", p.id), "P#4");
    }
}
