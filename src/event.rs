//! Event system for the simulation kernel.
//!
//! An `Event` is a future occurrence together with the waiters that want
//! to hear about it. It moves `Pending → Triggered → Processed` exactly
//! once: triggering attaches the outcome, processing hands that outcome to
//! every waiter in subscription order.

use crate::environment::Environment;
use crate::error::{SimError, SimResult};
use crate::process::ProcessId;
use crate::time::SimTime;
use crate::value::{Failure, Outcome, Value};

// ── Event ID ──────────────────────────────────────────────────────────

/// A globally unique, strictly-increasing event identifier.
///
/// Doubles as the handle clients hold on to: timeouts, plain events and
/// process completions are all addressed by their `EventId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw u64 into an `EventId`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    /// Return the raw value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ───────────────────────────────────────────────

/// Deterministic, strictly-increasing event-ID generator.
///
/// Each `Environment` owns exactly one of these.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Priority ──────────────────────────────────────────────────────────

/// Tie-break between events due at the same instant. Lower fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Priority(i32);

impl Priority {
    /// Fires ahead of everything else due at the same time.
    pub const URGENT: Priority = Priority(0);
    /// Default for timeouts, `succeed`/`fail` and process completions.
    pub const NORMAL: Priority = Priority(1);

    #[inline]
    pub fn new(raw: i32) -> Self {
        Priority(raw)
    }

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

// ── Kind / State ──────────────────────────────────────────────────────

/// What created the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// Created by `Environment::timeout`; triggered at creation.
    Timeout,
    /// The completion event of a process.
    Completion(ProcessId),
    /// Created by `Environment::event`; triggered manually.
    Plain,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Timeout => write!(f, "Timeout"),
            EventKind::Completion(pid) => write!(f, "Completion({})", pid),
            EventKind::Plain => write!(f, "Plain"),
        }
    }
}

/// Lifecycle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventState {
    /// No outcome yet.
    Pending,
    /// Outcome attached, sitting in the calendar.
    Triggered,
    /// Popped from the calendar and delivered to all waiters.
    Processed,
}

// ── Callbacks ─────────────────────────────────────────────────────────

/// A continuation run when an event is processed.
pub type CallbackFn = Box<dyn FnOnce(&mut Environment, &Outcome) -> SimResult<()>>;

/// A waiter registered on an event.
pub enum Callback {
    /// Resume a parked process with the event's outcome.
    Resume(ProcessId),
    /// Run a continuation with the event's outcome.
    Call(CallbackFn),
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callback::Resume(pid) => f.debug_tuple("Resume").field(pid).finish(),
            Callback::Call(_) => f.write_str("Call(..)"),
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single simulation event and its waiters.
#[derive(Debug)]
pub struct Event {
    /// Unique identifier (monotonically increasing).
    pub id: EventId,
    pub kind: EventKind,
    pub priority: Priority,
    /// When the event went into the calendar, once it has.
    pub scheduled_at: Option<SimTime>,
    state: EventState,
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
}

impl Event {
    /// A fresh, untriggered event.
    pub fn new(id: EventId, kind: EventKind, priority: Priority) -> Self {
        Event {
            id,
            kind,
            priority,
            scheduled_at: None,
            state: EventState::Pending,
            outcome: None,
            callbacks: Vec::new(),
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn is_triggered(&self) -> bool {
        self.state != EventState::Pending
    }

    pub fn is_processed(&self) -> bool {
        self.state == EventState::Processed
    }

    /// The attached outcome, once triggered.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// `Some(true)` once triggered successfully, `Some(false)` once failed.
    pub fn ok(&self) -> Option<bool> {
        self.outcome.as_ref().map(Result::is_ok)
    }

    /// Number of waiters still registered.
    pub fn waiter_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Attach an outcome. Pending → Triggered.
    pub fn trigger(&mut self, outcome: Outcome) -> SimResult<()> {
        if self.state != EventState::Pending {
            return Err(SimError::AlreadyTriggered(self.id));
        }
        self.outcome = Some(outcome);
        self.state = EventState::Triggered;
        Ok(())
    }

    pub fn succeed(&mut self, value: Value) -> SimResult<()> {
        self.trigger(Ok(value))
    }

    pub fn fail(&mut self, failure: Failure) -> SimResult<()> {
        self.trigger(Err(failure))
    }

    /// Register a waiter.
    ///
    /// On an already processed event the waiter is handed back so the
    /// caller can run it on the spot.
    pub fn subscribe(&mut self, callback: Callback) -> Result<(), Callback> {
        if self.is_processed() {
            return Err(callback);
        }
        self.callbacks.push(callback);
        Ok(())
    }

    /// Drop a parked process from the waiter list. Returns whether it was
    /// registered.
    pub fn unsubscribe(&mut self, pid: ProcessId) -> bool {
        let before = self.callbacks.len();
        self.callbacks
            .retain(|cb| !matches!(cb, Callback::Resume(p) if *p == pid));
        self.callbacks.len() != before
    }

    /// Triggered → Processed. Hands back the waiters, in subscription
    /// order, and a copy of the outcome to feed them.
    ///
    /// Returns `None` if the event is not in the `Triggered` state.
    pub fn process(&mut self) -> Option<(Vec<Callback>, Outcome)> {
        if self.state != EventState::Triggered {
            return None;
        }
        let outcome = self.outcome.clone()?;
        self.state = EventState::Processed;
        Some((std::mem::take(&mut self.callbacks), outcome))
    }
}
