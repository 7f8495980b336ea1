//! Structured error types for the kernel.
//!
//! All fallible public APIs return `Result<T, SimError>`. The first group
//! of variants are contract violations by the caller; `ComputationFailure`
//! is a process failure that reached the top of its awaiting chain.

use crate::event::EventId;
use crate::process::ProcessId;
use crate::time::SimTime;
use crate::value::Failure;

/// The top-level error type for the simulation kernel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    // ── Scheduling errors ─────────────────────────────────

    /// Attempted to schedule an event in the past.
    #[error("cannot schedule event at {requested} when current time is {now}")]
    InvalidScheduling { requested: SimTime, now: SimTime },

    /// A timeout delay was negative or not finite.
    #[error("invalid timeout delay {0}")]
    InvalidDelay(f64),

    /// A run horizon lies before the current time (or is NaN).
    #[error("run horizon {until} is before current time {now}")]
    InvalidUntil { until: SimTime, now: SimTime },

    /// The calendar had no event when one was required.
    #[error("calendar has no pending events")]
    Empty,

    // ── Event errors ──────────────────────────────────────

    /// `succeed`/`fail` called on an event that already has an outcome.
    #[error("event {0} has already been triggered")]
    AlreadyTriggered(EventId),

    /// The event was never created here, or has been released.
    #[error("unknown event {0}")]
    UnknownEvent(EventId),

    // ── Process errors ────────────────────────────────────

    /// The process id was never issued by this environment.
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    /// Attempted to interrupt a process that already terminated.
    #[error("process {0} has terminated")]
    ProcessTerminated(ProcessId),

    /// Attempted to interrupt a process that is executing right now
    /// (itself, or a parent whose resume spawned the caller).
    #[error("process {0} is running and cannot be interrupted")]
    ProcessRunning(ProcessId),

    /// A failure reached an event nobody was waiting on.
    #[error("unhandled failure in {}: {failure}", describe_origin(.event, .process))]
    ComputationFailure {
        event: EventId,
        process: Option<ProcessId>,
        failure: Failure,
    },
}

fn describe_origin(event: &EventId, process: &Option<ProcessId>) -> String {
    match process {
        Some(pid) => format!("{} ({})", pid, event),
        None => event.to_string(),
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
