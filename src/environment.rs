//! The kernel: virtual clock, calendar, and the process driver.
//!
//! `Environment` owns every event and process. Its loop pops the earliest
//! event, advances the clock to it, and hands the event's outcome to each
//! waiter in subscription order. Parked processes are resumed in place;
//! whatever they schedule lands back in the calendar. The loop is purely
//! synchronous and single-threaded.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::calendar::Calendar;
use crate::config::EnvConfig;
use crate::error::{SimError, SimResult};
use crate::event::{Callback, Event, EventId, EventIdGen, EventKind, EventState, Priority};
use crate::process::{Awaitable, Computation, Process, ProcessId, ProcessState, Resume, Step};
use crate::time::SimTime;
use crate::trace::{EventTrace, TraceEntry};
use crate::value::{Failure, Outcome, Value};

// ── Until ─────────────────────────────────────────────────────────────

/// Stop condition for [`Environment::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    /// Run until the calendar is empty.
    Exhausted,
    /// Process every event due at or before this time, then set the clock
    /// to it.
    Time(SimTime),
    /// Run until this event has been processed.
    Event(EventId),
    /// Run until this process's completion event has been processed.
    Process(ProcessId),
}

impl From<SimTime> for Until {
    fn from(t: SimTime) -> Self {
        Until::Time(t)
    }
}

impl From<f64> for Until {
    fn from(t: f64) -> Self {
        Until::Time(SimTime::new(t))
    }
}

impl From<EventId> for Until {
    fn from(id: EventId) -> Self {
        Until::Event(id)
    }
}

impl From<ProcessId> for Until {
    fn from(id: ProcessId) -> Self {
        Until::Process(id)
    }
}

// ── Environment ───────────────────────────────────────────────────────

/// Top-level simulation kernel.
///
/// Call [`timeout`](Self::timeout) and [`process`](Self::process) to seed
/// work, then [`run`](Self::run) or [`step`](Self::step) to execute it.
pub struct Environment {
    now: SimTime,
    calendar: Calendar,
    events: BTreeMap<EventId, Event>,
    processes: Vec<Process>,
    event_ids: EventIdGen,
    /// The process whose `resume` is executing, if any.
    active: Option<ProcessId>,
    events_processed: u64,
    trace: Option<EventTrace>,
    config: EnvConfig,
}

impl Environment {
    /// Create an environment starting at time zero.
    pub fn new() -> Self {
        Self::with_config(EnvConfig::default())
    }

    pub fn with_config(config: EnvConfig) -> Self {
        Environment {
            now: config.start_time,
            calendar: Calendar::new(),
            events: BTreeMap::new(),
            processes: Vec::new(),
            event_ids: EventIdGen::new(),
            active: None,
            events_processed: 0,
            trace: config.record_trace.then(EventTrace::new),
            config,
        }
    }

    // ── Inspection ────────────────────────────────────────────

    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Total events processed so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Number of entries waiting in the calendar.
    pub fn pending_count(&self) -> usize {
        self.calendar.len()
    }

    /// Time of the next due event, if any.
    pub fn peek(&self) -> Option<SimTime> {
        self.calendar.peek_next().map(|e| e.time)
    }

    /// The process currently executing its `resume`, if any.
    pub fn active_process(&self) -> Option<ProcessId> {
        self.active
    }

    /// The processed-event trace, when enabled in the config.
    pub fn trace(&self) -> Option<&EventTrace> {
        self.trace.as_ref()
    }

    pub fn event_state(&self, id: EventId) -> SimResult<EventState> {
        Ok(self.record(id)?.state())
    }

    /// The outcome attached to an event, once triggered.
    pub fn event_outcome(&self, id: EventId) -> SimResult<Option<&Outcome>> {
        Ok(self.record(id)?.outcome())
    }

    pub fn process_state(&self, pid: ProcessId) -> SimResult<ProcessState> {
        Ok(self.slot(pid)?.state)
    }

    /// `false` once the process returned or failed.
    pub fn is_alive(&self, pid: ProcessId) -> SimResult<bool> {
        Ok(!self.process_state(pid)?.is_terminal())
    }

    /// The event a process is parked on.
    pub fn process_target(&self, pid: ProcessId) -> SimResult<Option<EventId>> {
        Ok(self.slot(pid)?.target)
    }

    /// The completion event of a process.
    pub fn completion_of(&self, pid: ProcessId) -> SimResult<EventId> {
        Ok(self.slot(pid)?.completion)
    }

    /// What the process returned or failed with, once it terminated.
    pub fn process_outcome(&self, pid: ProcessId) -> SimResult<Option<&Outcome>> {
        let completion = self.completion_of(pid)?;
        self.event_outcome(completion)
    }

    fn record(&self, id: EventId) -> SimResult<&Event> {
        self.events.get(&id).ok_or(SimError::UnknownEvent(id))
    }

    fn record_mut(&mut self, id: EventId) -> SimResult<&mut Event> {
        self.events.get_mut(&id).ok_or(SimError::UnknownEvent(id))
    }

    fn slot(&self, pid: ProcessId) -> SimResult<&Process> {
        self.processes
            .get(pid.raw() as usize)
            .ok_or(SimError::UnknownProcess(pid))
    }

    fn slot_mut(&mut self, pid: ProcessId) -> SimResult<&mut Process> {
        self.processes
            .get_mut(pid.raw() as usize)
            .ok_or(SimError::UnknownProcess(pid))
    }

    // ── Events ────────────────────────────────────────────────

    fn new_event(&mut self, kind: EventKind, priority: Priority) -> EventId {
        let id = self.event_ids.next_id();
        self.events.insert(id, Event::new(id, kind, priority));
        id
    }

    /// Create an untriggered event; resolve it later with
    /// [`succeed`](Self::succeed) or [`fail`](Self::fail).
    pub fn event(&mut self) -> EventId {
        self.new_event(EventKind::Plain, Priority::URGENT)
    }

    /// An event that fires `delay` after now with no value.
    pub fn timeout(&mut self, delay: f64) -> SimResult<EventId> {
        self.timeout_with_priority(delay, Value::Empty, Priority::NORMAL)
    }

    /// An event that fires `delay` after now carrying `value`.
    pub fn timeout_with(&mut self, delay: f64, value: impl Into<Value>) -> SimResult<EventId> {
        self.timeout_with_priority(delay, value, Priority::NORMAL)
    }

    pub fn timeout_with_priority(
        &mut self,
        delay: f64,
        value: impl Into<Value>,
        priority: Priority,
    ) -> SimResult<EventId> {
        let at = self.now.plus(delay).ok_or(SimError::InvalidDelay(delay))?;
        let id = self.new_event(EventKind::Timeout, priority);
        let record = self.record_mut(id)?;
        record.succeed(value.into())?;
        record.scheduled_at = Some(at);
        self.calendar.schedule(id, at, priority, self.now)?;
        trace!(event = %id, at = %at, "timeout scheduled");
        Ok(id)
    }

    /// Attach an outcome and put the event in the calendar at `now`, ahead
    /// of ordinary timeouts due at the same instant.
    fn trigger(&mut self, id: EventId, outcome: Outcome) -> SimResult<()> {
        let now = self.now;
        let record = self.record_mut(id)?;
        record.trigger(outcome)?;
        record.scheduled_at = Some(now);
        let priority = record.priority;
        self.calendar.schedule(id, now, priority, now)
    }

    /// Resolve a pending event successfully.
    pub fn succeed(&mut self, id: EventId, value: impl Into<Value>) -> SimResult<()> {
        self.trigger(id, Ok(value.into()))
    }

    /// Resolve a pending event with a failure. If nothing waits on it by
    /// the time it is processed, `run` reports a `ComputationFailure`.
    pub fn fail(&mut self, id: EventId, failure: Failure) -> SimResult<()> {
        self.trigger(id, Err(failure))
    }

    /// Register a continuation on an event.
    ///
    /// On an event that was already processed the continuation runs right
    /// away, before this call returns.
    pub fn add_callback<F>(&mut self, id: EventId, callback: F) -> SimResult<()>
    where
        F: FnOnce(&mut Environment, &Outcome) -> SimResult<()> + 'static,
    {
        let record = self.record_mut(id)?;
        match record.subscribe(Callback::Call(Box::new(callback))) {
            Ok(()) => Ok(()),
            Err(Callback::Call(callback)) => {
                let outcome = record
                    .outcome()
                    .cloned()
                    .ok_or(SimError::UnknownEvent(id))?;
                callback(self, &outcome)
            }
            Err(Callback::Resume(_)) => Ok(()),
        }
    }

    // ── Processes ─────────────────────────────────────────────

    /// Spawn a process and run it up to its first suspension point.
    pub fn process<C>(&mut self, computation: C) -> SimResult<ProcessId>
    where
        C: Computation + 'static,
    {
        self.spawn(None, Box::new(computation))
    }

    /// Like [`process`](Self::process), with a name for logs.
    pub fn process_named<C>(&mut self, name: impl Into<String>, computation: C) -> SimResult<ProcessId>
    where
        C: Computation + 'static,
    {
        self.spawn(Some(name.into()), Box::new(computation))
    }

    fn spawn(&mut self, name: Option<String>, computation: Box<dyn Computation>) -> SimResult<ProcessId> {
        let pid = ProcessId::new(self.processes.len() as u64);
        let completion = self.new_event(EventKind::Completion(pid), Priority::URGENT);
        let process = Process::new(pid, name, completion, computation);
        debug!(process = %process.label(), now = %self.now, "process spawned");
        self.processes.push(process);
        self.drive(pid, Resume::Start)?;
        Ok(pid)
    }

    /// Resume a process and keep it going until it parks or terminates.
    ///
    /// Waiting on an already processed event resumes the computation again
    /// straight away with that event's outcome.
    fn drive(&mut self, pid: ProcessId, input: Resume) -> SimResult<()> {
        let mut input = input;
        loop {
            let process = self.slot_mut(pid)?;
            // Absent while an outer frame is running it, or once terminated.
            let Some(mut computation) = process.computation.take() else {
                return Ok(());
            };
            process.state = ProcessState::Running;
            process.target = None;

            let previous = self.active.replace(pid);
            trace!(process = %pid, now = %self.now, "resume");
            let step = computation.resume(self, input);
            self.active = previous;

            let step = match step {
                Ok(step) => step,
                Err(e) => {
                    self.slot_mut(pid)?.computation = Some(computation);
                    return Err(e);
                }
            };

            match step {
                Step::Wait(awaitable) => {
                    self.slot_mut(pid)?.computation = Some(computation);
                    let target = match awaitable {
                        Awaitable::Event(id) => id,
                        Awaitable::Completion(other) => self.completion_of(other)?,
                    };
                    let record = self
                        .events
                        .get_mut(&target)
                        .ok_or(SimError::UnknownEvent(target))?;
                    match record.subscribe(Callback::Resume(pid)) {
                        Ok(()) => {
                            let process = self.slot_mut(pid)?;
                            process.target = Some(target);
                            process.state = ProcessState::Waiting;
                            return Ok(());
                        }
                        Err(_) => {
                            let outcome = record
                                .outcome()
                                .cloned()
                                .ok_or(SimError::UnknownEvent(target))?;
                            trace!(process = %pid, event = %target, "already processed, resuming inline");
                            input = Resume::from(outcome);
                        }
                    }
                }
                Step::Return(value) => return self.finish(pid, Ok(value)),
                Step::Fail(failure) => return self.finish(pid, Err(failure)),
            }
        }
    }

    fn finish(&mut self, pid: ProcessId, outcome: Outcome) -> SimResult<()> {
        let process = self.slot_mut(pid)?;
        process.state = if outcome.is_ok() {
            ProcessState::Completed
        } else {
            ProcessState::Failed
        };
        process.target = None;
        let completion = process.completion;
        match &outcome {
            Ok(value) => debug!(process = %process.label(), %value, "process completed"),
            Err(failure) => debug!(process = %process.label(), %failure, "process failed"),
        }
        self.trigger(completion, outcome)
    }

    /// Inject a failure at a process's current suspension point.
    ///
    /// The process is detached from the event it was waiting on and
    /// resumed immediately with `Failure::Interrupted(cause)`.
    pub fn interrupt(&mut self, pid: ProcessId, cause: impl Into<Value>) -> SimResult<()> {
        let process = self.slot_mut(pid)?;
        if process.state.is_terminal() {
            return Err(SimError::ProcessTerminated(pid));
        }
        if process.computation.is_none() {
            return Err(SimError::ProcessRunning(pid));
        }
        if let Some(target) = process.target.take() {
            if let Some(record) = self.events.get_mut(&target) {
                record.unsubscribe(pid);
            }
        }
        let cause = cause.into();
        debug!(process = %pid, %cause, now = %self.now, "interrupt");
        self.drive(pid, Resume::Failed(Failure::Interrupted(cause)))
    }

    // ── Execution loop ────────────────────────────────────────

    /// Process exactly one event: pop it, advance the clock, run waiters.
    ///
    /// Fails with `Empty` if nothing is scheduled, and with
    /// `ComputationFailure` if the event failed and nobody waited on it.
    pub fn step(&mut self) -> SimResult<()> {
        let entry = self.calendar.pop_next()?;
        // The calendar refuses entries before `now`, so time never goes back.
        debug_assert!(entry.time >= self.now, "time went backward");
        self.now = entry.time;

        let record = self.record_mut(entry.event)?;
        let kind = record.kind;
        let priority = record.priority;
        let Some((callbacks, outcome)) = record.process() else {
            return Ok(());
        };
        let index = self.events_processed;
        self.events_processed += 1;
        debug!(
            event = %entry.event,
            %kind,
            now = %self.now,
            waiters = callbacks.len(),
            ok = outcome.is_ok(),
            "processing event"
        );
        if let Some(log) = self.trace.as_mut() {
            log.record(TraceEntry {
                index,
                time: self.now,
                event: entry.event,
                kind,
                priority,
                ok: outcome.is_ok(),
                waiters: callbacks.len(),
            });
        }

        let handled = !callbacks.is_empty();
        for callback in callbacks {
            match callback {
                Callback::Resume(pid) => {
                    // Skip waiters that were interrupted away from this event
                    // by an earlier callback.
                    if self.slot(pid)?.target != Some(entry.event) {
                        continue;
                    }
                    self.drive(pid, Resume::from(outcome.clone()))?;
                }
                Callback::Call(f) => f(self, &outcome)?,
            }
        }

        if !self.config.retain_processed && !matches!(kind, EventKind::Completion(_)) {
            self.events.remove(&entry.event);
        }

        match outcome {
            Err(failure) if !handled => {
                let process = match kind {
                    EventKind::Completion(pid) => Some(pid),
                    _ => None,
                };
                warn!(event = %entry.event, %failure, now = %self.now, "unhandled failure");
                Err(SimError::ComputationFailure {
                    event: entry.event,
                    process,
                    failure,
                })
            }
            _ => Ok(()),
        }
    }

    /// Run until the stop condition is met.
    ///
    /// - `Until::Exhausted`: until the calendar is empty.
    /// - `Until::Time(t)`: processes every event due at or before `t`, then
    ///   sets the clock to `t`. Later events stay scheduled, so a further
    ///   `run` resumes where this one stopped. `t` before `now` fails with
    ///   `InvalidUntil`.
    /// - `Until::Event(e)` / `Until::Process(p)`: until that event (or the
    ///   process's completion) has been processed, regardless of what else
    ///   is scheduled. If it failed, the failure is returned as
    ///   `ComputationFailure`. Fails with `Empty` if the calendar drains
    ///   first.
    pub fn run(&mut self, until: impl Into<Until>) -> SimResult<()> {
        match until.into() {
            Until::Exhausted => {
                while !self.calendar.is_empty() {
                    self.step()?;
                }
                Ok(())
            }
            Until::Time(horizon) => {
                if horizon.as_f64().is_nan() || horizon < self.now {
                    return Err(SimError::InvalidUntil {
                        until: horizon,
                        now: self.now,
                    });
                }
                while let Some(next) = self.calendar.peek_next() {
                    if next.time > horizon {
                        break;
                    }
                    self.step()?;
                }
                self.now = horizon;
                Ok(())
            }
            Until::Event(id) => self.run_until_event(id, None),
            Until::Process(pid) => {
                let completion = self.completion_of(pid)?;
                self.run_until_event(completion, Some(pid))
            }
        }
    }

    fn run_until_event(&mut self, id: EventId, process: Option<ProcessId>) -> SimResult<()> {
        let seen: Rc<RefCell<Option<Outcome>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        self.add_callback(id, move |_, outcome| {
            *sink.borrow_mut() = Some(outcome.clone());
            Ok(())
        })?;

        loop {
            if let Some(outcome) = seen.borrow_mut().take() {
                return match outcome {
                    Ok(_) => Ok(()),
                    Err(failure) => Err(SimError::ComputationFailure {
                        event: id,
                        process,
                        failure,
                    }),
                };
            }
            self.step()?;
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now)
            .field("pending", &self.calendar.len())
            .field("events", &self.events.len())
            .field("processes", &self.processes.len())
            .field("events_processed", &self.events_processed)
            .finish()
    }
}

#[cfg(test)]
mod tests;
