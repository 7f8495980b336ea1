//! Tests for the kernel loop and the process driver.

use std::cell::RefCell;
use std::rc::Rc;

use tracing_test::traced_test;

use crate::config::EnvConfig;
use crate::environment::{Environment, Until};
use crate::error::{SimError, SimResult};
use crate::event::{EventId, EventKind, EventState, Priority};
use crate::process::{ProcessId, ProcessState, Resume, Step};
use crate::time::SimTime;
use crate::value::{Failure, Value};

type Log = Rc<RefCell<Vec<(f64, Resume)>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Waits on a timeout for each delay in turn, logging every resume, then
/// returns `result`.
fn delays(delays: Vec<f64>, log: Log, result: Value) -> impl FnMut(&mut Environment, Resume) -> SimResult<Step> {
    let mut next = 0;
    move |env: &mut Environment, input: Resume| {
        log.borrow_mut().push((env.now().as_f64(), input));
        if next < delays.len() {
            next += 1;
            return Ok(Step::wait(env.timeout(delays[next - 1])?));
        }
        Ok(Step::Return(result.clone()))
    }
}

/// Fails after a single timeout.
fn failing_after(delay: f64, msg: &'static str) -> impl FnMut(&mut Environment, Resume) -> SimResult<Step> {
    let mut waited = false;
    move |env: &mut Environment, _input: Resume| {
        if !waited {
            waited = true;
            return Ok(Step::wait(env.timeout(delay)?));
        }
        Ok(Step::fail(Failure::raised(msg)))
    }
}

fn traced_env() -> Environment {
    Environment::with_config(EnvConfig::new().with_trace())
}

fn timeouts_in_trace(env: &Environment) -> Vec<(f64, EventId)> {
    env.trace()
        .unwrap()
        .entries()
        .iter()
        .filter(|e| e.kind == EventKind::Timeout)
        .map(|e| (e.time.as_f64(), e.event))
        .collect()
}

// ── Basic scenarios ───────────────────────────────────────────────────

#[test]
fn test_timeout_value_delivered() {
    let mut env = Environment::new();
    let log = new_log();
    let sink = Rc::clone(&log);
    let mut waited = false;

    env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
        if !waited {
            waited = true;
            return Ok(Step::wait(env.timeout_with(1.0, 42)?));
        }
        sink.borrow_mut().push((env.now().as_f64(), input));
        Ok(Step::done())
    })
    .unwrap();

    env.run(Until::Exhausted).unwrap();

    assert_eq!(env.now(), SimTime::new(1.0));
    assert_eq!(*log.borrow(), vec![(1.0, Resume::Value(Value::Int(42)))]);
}

#[test]
fn test_process_starts_immediately() {
    let mut env = Environment::new();
    let log = new_log();
    let pid = env.process(delays(vec![3.0], Rc::clone(&log), Value::Empty)).unwrap();

    // First resume happened inside `process`, before any run.
    assert_eq!(*log.borrow(), vec![(0.0, Resume::Start)]);
    assert_eq!(env.process_state(pid).unwrap(), ProcessState::Waiting);
    assert!(env.process_target(pid).unwrap().is_some());
    assert_eq!(env.pending_count(), 1);
}

#[test]
fn test_equal_delays_fire_in_scheduling_order() {
    let mut env = traced_env();
    let delays = [3.0, 1.0, 3.0, 0.0, 1.0, 3.0, 0.5];
    let ids: Vec<EventId> = delays.iter().map(|d| env.timeout(*d).unwrap()).collect();

    env.run(Until::Exhausted).unwrap();

    let mut expected: Vec<(f64, EventId)> = delays.iter().copied().zip(ids).collect();
    expected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    assert_eq!(timeouts_in_trace(&env), expected);
}

#[test]
fn test_urgent_priority_fires_first() {
    let mut env = traced_env();
    let normal = env.timeout(2.0).unwrap();
    let urgent = env
        .timeout_with_priority(2.0, Value::Empty, Priority::URGENT)
        .unwrap();

    env.run(Until::Exhausted).unwrap();

    assert_eq!(env.trace().unwrap().event_order(), vec![urgent, normal]);
}

#[test]
fn test_two_processes_same_instant() {
    let mut env = traced_env();
    let instants: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));

    let spawn = |env: &mut Environment, instants: Rc<RefCell<Vec<f64>>>| -> (EventId, EventId) {
        let ids: Rc<RefCell<Option<(EventId, EventId)>>> = Rc::new(RefCell::new(None));
        let out = Rc::clone(&ids);
        let mut stage = 0;
        env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
            instants.borrow_mut().push(env.now().as_f64());
            stage += 1;
            match stage {
                1 => {
                    let five = env.timeout(5.0)?;
                    let zero = env.timeout(0.0)?;
                    *out.borrow_mut() = Some((five, zero));
                    Ok(Step::wait(zero))
                }
                2 => {
                    let (five, _) = out.borrow().expect("scheduled in stage 1");
                    Ok(Step::wait(five))
                }
                _ => Ok(Step::done()),
            }
        })
        .unwrap();
        let pair = ids.borrow().unwrap();
        pair
    };

    let (a_five, a_zero) = spawn(&mut env, Rc::clone(&instants));
    let (b_five, b_zero) = spawn(&mut env, Rc::clone(&instants));

    env.run(Until::Exhausted).unwrap();

    assert_eq!(
        timeouts_in_trace(&env),
        vec![(0.0, a_zero), (0.0, b_zero), (5.0, a_five), (5.0, b_five)]
    );

    // Clock values seen by the processes: start, zero-delay, five-delay.
    assert_eq!(*instants.borrow(), vec![0.0, 0.0, 0.0, 0.0, 5.0, 5.0]);

    // The clock moved 0 → 5 once.
    let mut times: Vec<f64> = env.trace().unwrap().entries().iter().map(|e| e.time.as_f64()).collect();
    times.dedup();
    assert_eq!(times, vec![0.0, 5.0]);
}

#[test]
fn test_zero_delay_chain_keeps_clock() {
    let mut env = Environment::new();
    let log = new_log();
    env.process(delays(vec![0.0, 0.0, 0.0], Rc::clone(&log), Value::Empty)).unwrap();
    env.run(Until::Exhausted).unwrap();

    assert_eq!(env.now(), SimTime::ZERO);
    assert_eq!(log.borrow().len(), 4);
}

// ── Horizons ──────────────────────────────────────────────────────────

fn endless_ticker(env: &mut Environment, period: f64, ticks: Rc<RefCell<Vec<f64>>>) -> ProcessId {
    env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
        ticks.borrow_mut().push(env.now().as_f64());
        Ok(Step::wait(env.timeout(period)?))
    })
    .unwrap()
}

#[test]
fn test_run_until_time_stops_at_horizon() {
    let mut env = traced_env();
    let ticks = Rc::new(RefCell::new(Vec::new()));
    endless_ticker(&mut env, 1.5, Rc::clone(&ticks));

    env.run(10.0).unwrap();

    assert_eq!(env.now(), SimTime::new(10.0));
    assert!(env
        .trace()
        .unwrap()
        .entries()
        .iter()
        .all(|e| e.time <= SimTime::new(10.0)));
    assert_eq!(*ticks.borrow(), vec![0.0, 1.5, 3.0, 4.5, 6.0, 7.5, 9.0]);
    // The 10.5 tick is still scheduled.
    assert_eq!(env.peek(), Some(SimTime::new(10.5)));
}

#[test]
fn test_run_until_time_is_resumable() {
    let mut env = Environment::new();
    let ticks = Rc::new(RefCell::new(Vec::new()));
    endless_ticker(&mut env, 2.0, Rc::clone(&ticks));

    env.run(3.0).unwrap();
    assert_eq!(ticks.borrow().len(), 2);
    env.run(SimTime::new(8.0)).unwrap();
    assert_eq!(*ticks.borrow(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert_eq!(env.now(), SimTime::new(8.0));
}

#[test]
fn test_run_until_time_processes_events_at_horizon() {
    let mut env = Environment::new();
    let at_horizon = env.timeout(5.0).unwrap();
    env.run(5.0).unwrap();
    assert_eq!(env.event_state(at_horizon).unwrap(), EventState::Processed);
}

#[test]
fn test_run_until_past_rejected() {
    let mut env = Environment::new();
    env.timeout(4.0).unwrap();
    env.run(4.0).unwrap();

    assert_eq!(
        env.run(1.0),
        Err(SimError::InvalidUntil {
            until: SimTime::new(1.0),
            now: SimTime::new(4.0)
        })
    );
    assert!(matches!(env.run(f64::NAN), Err(SimError::InvalidUntil { .. })));
    assert_eq!(env.now(), SimTime::new(4.0));
}

#[test]
fn test_run_until_process_ignores_rest_of_calendar() {
    let mut env = Environment::new();
    let ticks = Rc::new(RefCell::new(Vec::new()));
    endless_ticker(&mut env, 1.0, Rc::clone(&ticks));
    let worker = env
        .process(delays(vec![2.5, 2.5], new_log(), Value::Int(7)))
        .unwrap();

    env.run(worker).unwrap();

    assert_eq!(env.now(), SimTime::new(5.0));
    assert_eq!(env.process_outcome(worker).unwrap(), Some(&Ok(Value::Int(7))));
    assert!(env.pending_count() > 0);
}

#[test]
fn test_run_until_failed_process_reports_failure() {
    let mut env = Environment::new();
    let p = env.process(failing_after(2.0, "jammed")).unwrap();

    assert_eq!(
        env.run(p),
        Err(SimError::ComputationFailure {
            event: env.completion_of(p).unwrap(),
            process: Some(p),
            failure: Failure::raised("jammed"),
        })
    );
    assert_eq!(env.now(), SimTime::new(2.0));
}

#[test]
fn test_run_until_event_never_triggered() {
    let mut env = Environment::new();
    let never = env.event();
    env.timeout(1.0).unwrap();
    assert_eq!(env.run(never), Err(SimError::Empty));
    assert_eq!(env.now(), SimTime::new(1.0));
}

#[test]
fn test_step_on_empty_calendar() {
    let mut env = Environment::new();
    assert_eq!(env.step(), Err(SimError::Empty));
    env.run(Until::Exhausted).unwrap();
    assert_eq!(env.events_processed(), 0);
}

// ── Composition ───────────────────────────────────────────────────────

#[test]
fn test_awaiting_process_yields_its_value() {
    let mut env = Environment::new();
    let log = new_log();
    let sink = Rc::clone(&log);
    let mut child = None;

    env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
        match child {
            None => {
                let pid = env.process(delays(vec![4.0], new_log(), Value::from("part-3")))?;
                child = Some(pid);
                Ok(Step::wait(pid))
            }
            Some(_) => {
                sink.borrow_mut().push((env.now().as_f64(), input));
                Ok(Step::done())
            }
        }
    })
    .unwrap();

    env.run(Until::Exhausted).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![(4.0, Resume::Value(Value::Text("part-3".into())))]
    );
}

#[test]
fn test_child_failure_reaches_parent() {
    let mut env = Environment::new();
    let log = new_log();
    let sink = Rc::clone(&log);
    let mut started = false;

    let parent = env
        .process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
            if !started {
                started = true;
                let child = env.process(failing_after(1.0, "injected"))?;
                return Ok(Step::wait(child));
            }
            sink.borrow_mut().push((env.now().as_f64(), input.clone()));
            // Handled: recover and finish normally.
            Ok(Step::ret("recovered"))
        })
        .unwrap();

    env.run(Until::Exhausted).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![(1.0, Resume::Failed(Failure::raised("injected")))]
    );
    assert_eq!(env.process_outcome(parent).unwrap(), Some(&Ok(Value::from("recovered"))));
}

#[test]
fn test_unhandled_child_failure_is_fatal() {
    let mut env = Environment::new();
    let mut started = false;

    let parent = env
        .process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
            if !started {
                started = true;
                let child = env.process(failing_after(1.0, "injected"))?;
                return Ok(Step::wait(child));
            }
            // Propagate whatever the child delivered.
            Ok(Step::from(input.into_result()))
        })
        .unwrap();

    let err = env.run(Until::Exhausted).unwrap_err();
    assert_eq!(
        err,
        SimError::ComputationFailure {
            event: env.completion_of(parent).unwrap(),
            process: Some(parent),
            failure: Failure::raised("injected"),
        }
    );
    assert_eq!(env.process_state(parent).unwrap(), ProcessState::Failed);
    assert_eq!(env.now(), SimTime::new(1.0));
}

#[traced_test]
#[test]
fn test_orphan_failure_is_fatal_and_logged() {
    let mut env = Environment::new();
    let orphan = env.process(failing_after(3.0, "nobody listens")).unwrap();
    let later = env.timeout(10.0).unwrap();

    let err = env.run(Until::Exhausted).unwrap_err();
    assert!(matches!(
        err,
        SimError::ComputationFailure { process: Some(p), .. } if p == orphan
    ));
    // The clock stays where the failure surfaced; the later event is intact.
    assert_eq!(env.now(), SimTime::new(3.0));
    assert_eq!(env.event_state(later).unwrap(), EventState::Triggered);
    assert!(logs_contain("unhandled failure"));

    // The run can be continued past the failure.
    env.run(Until::Exhausted).unwrap();
    assert_eq!(env.now(), SimTime::new(10.0));
}

#[test]
fn test_waiting_on_finished_process_resumes_inline() {
    let mut env = Environment::new();
    let child = env.process(delays(vec![1.0], new_log(), Value::Int(5))).unwrap();
    let log = new_log();
    let sink = Rc::clone(&log);
    let mut stage = 0;

    env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
        stage += 1;
        match stage {
            1 => Ok(Step::wait(env.timeout(3.0)?)),
            2 => Ok(Step::wait(child)),
            _ => {
                sink.borrow_mut().push((env.now().as_f64(), input));
                Ok(Step::done())
            }
        }
    })
    .unwrap();

    env.run(3.0).unwrap();
    assert_eq!(*log.borrow(), vec![(3.0, Resume::Value(Value::Int(5)))]);
    // Child timeout, child completion, parent timeout, parent completion.
    // Awaiting the finished child added nothing to the calendar.
    assert_eq!(env.events_processed(), 4);
}

#[test]
fn test_contract_error_in_computation_aborts_run() {
    let mut env = Environment::new();
    let mut stage = 0;
    env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
        stage += 1;
        if stage == 1 {
            return Ok(Step::wait(env.timeout(1.0)?));
        }
        Ok(Step::wait(env.timeout(-2.0)?))
    })
    .unwrap();

    assert_eq!(env.run(Until::Exhausted), Err(SimError::InvalidDelay(-2.0)));
    assert_eq!(env.now(), SimTime::new(1.0));
}

// ── Events and callbacks ──────────────────────────────────────────────

#[test]
fn test_invalid_delays() {
    let mut env = Environment::new();
    assert_eq!(env.timeout(-0.1), Err(SimError::InvalidDelay(-0.1)));
    assert!(matches!(env.timeout(f64::NAN), Err(SimError::InvalidDelay(_))));
    assert!(matches!(env.timeout(f64::INFINITY), Err(SimError::InvalidDelay(_))));
    assert_eq!(env.pending_count(), 0);
}

#[test]
fn test_manual_event_signalling() {
    let mut env = Environment::new();
    let signal = env.event();
    let log = new_log();
    let sink = Rc::clone(&log);
    let mut waited = false;

    env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
        if !waited {
            waited = true;
            return Ok(Step::wait(signal));
        }
        sink.borrow_mut().push((env.now().as_f64(), input));
        Ok(Step::done())
    })
    .unwrap();

    let mut fired = false;
    env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
        if !fired {
            fired = true;
            return Ok(Step::wait(env.timeout(2.0)?));
        }
        env.succeed(signal, "go")?;
        Ok(Step::done())
    })
    .unwrap();

    assert_eq!(env.event_state(signal).unwrap(), EventState::Pending);
    env.run(Until::Exhausted).unwrap();
    assert_eq!(*log.borrow(), vec![(2.0, Resume::Value(Value::from("go")))]);
}

#[test]
fn test_double_trigger_rejected() {
    let mut env = Environment::new();
    let ev = env.event();
    env.succeed(ev, 1).unwrap();
    assert_eq!(env.succeed(ev, 2), Err(SimError::AlreadyTriggered(ev)));
    assert_eq!(
        env.fail(ev, Failure::raised("late")),
        Err(SimError::AlreadyTriggered(ev))
    );

    let t = env.timeout(1.0).unwrap();
    assert_eq!(env.succeed(t, 0), Err(SimError::AlreadyTriggered(t)));
}

#[test]
fn test_failed_plain_event_without_waiter() {
    let mut env = Environment::new();
    let ev = env.event();
    env.fail(ev, Failure::raised("lost signal")).unwrap();
    assert_eq!(
        env.run(Until::Exhausted),
        Err(SimError::ComputationFailure {
            event: ev,
            process: None,
            failure: Failure::raised("lost signal"),
        })
    );
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let mut env = Environment::new();
    let ev = env.timeout_with(1.0, 9).unwrap();
    let seen: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let seen = Rc::clone(&seen);
        env.add_callback(ev, move |env, outcome| {
            assert_eq!(env.now(), SimTime::new(1.0));
            assert_eq!(outcome, &Ok(Value::Int(9)));
            seen.borrow_mut().push(name);
            Ok(())
        })
        .unwrap();
    }
    assert!(seen.borrow().is_empty());

    env.run(Until::Exhausted).unwrap();
    assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn test_callback_on_processed_event_fires_inline() {
    let mut env = Environment::new();
    let ev = env.timeout_with(1.0, "done").unwrap();
    env.run(Until::Exhausted).unwrap();

    let hit = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&hit);
    env.add_callback(ev, move |_, outcome| {
        *sink.borrow_mut() = Some(outcome.clone());
        Ok(())
    })
    .unwrap();

    assert_eq!(*hit.borrow(), Some(Ok(Value::from("done"))));
    assert_eq!(env.pending_count(), 0);
}

#[test]
fn test_callback_can_schedule_followups() {
    let mut env = Environment::new();
    let ev = env.timeout(1.0).unwrap();
    env.add_callback(ev, |env, _| {
        env.timeout(2.0)?;
        Ok(())
    })
    .unwrap();

    env.run(Until::Exhausted).unwrap();
    assert_eq!(env.now(), SimTime::new(3.0));
}

// ── Interrupts ────────────────────────────────────────────────────────

#[test]
fn test_interrupt_delivers_cause() {
    let mut env = traced_env();
    let log = new_log();
    let victim = env
        .process(delays(vec![10.0, 1.0], Rc::clone(&log), Value::Empty))
        .unwrap();
    let first_target = env.process_target(victim).unwrap().unwrap();

    let mut waited = false;
    env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
        if !waited {
            waited = true;
            return Ok(Step::wait(env.timeout(3.0)?));
        }
        env.interrupt(victim, "breakdown")?;
        Ok(Step::done())
    })
    .unwrap();

    env.run(Until::Exhausted).unwrap();

    let log = log.borrow();
    assert_eq!(
        log[1],
        (3.0, Resume::Failed(Failure::Interrupted(Value::from("breakdown"))))
    );
    // The victim went on to its second delay, scheduled from the interrupt.
    assert_eq!(log[2], (4.0, Resume::Value(Value::Empty)));
    // The first target still fired, with nobody waiting.
    let entry = env
        .trace()
        .unwrap()
        .entries()
        .iter()
        .find(|e| e.event == first_target)
        .cloned()
        .unwrap();
    assert_eq!(entry.waiters, 0);
    assert_eq!(env.now(), SimTime::new(10.0));
}

#[test]
fn test_interrupt_terminated_process() {
    let mut env = Environment::new();
    let p = env.process(delays(vec![], new_log(), Value::Empty)).unwrap();
    assert_eq!(env.interrupt(p, ()), Err(SimError::ProcessTerminated(p)));
    assert_eq!(
        env.interrupt(ProcessId::new(99), ()),
        Err(SimError::UnknownProcess(ProcessId::new(99)))
    );
}

#[test]
fn test_interrupt_self_rejected() {
    let mut env = Environment::new();
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
        let me = env.active_process().expect("running inside a process");
        *sink.borrow_mut() = Some(env.interrupt(me, ()));
        Ok(Step::done())
    })
    .unwrap();

    let result = seen.borrow_mut().take().unwrap();
    assert_eq!(result, Err(SimError::ProcessRunning(ProcessId::new(0))));
    assert_eq!(env.active_process(), None);
}

// ── Config: trace and retention ───────────────────────────────────────

fn traced_run() -> u64 {
    let mut env = traced_env();
    for (i, d) in [2.0, 1.0, 2.0, 0.5].into_iter().enumerate() {
        env.process(delays(vec![d, d], new_log(), Value::from(i))).unwrap();
    }
    env.run(Until::Exhausted).unwrap();
    env.trace().unwrap().hash()
}

#[test]
fn test_trace_is_deterministic() {
    assert_eq!(traced_run(), traced_run());
}

#[test]
fn test_release_processed_events() {
    let mut env = Environment::with_config(EnvConfig::new().release_processed());
    let t = env.timeout(1.0).unwrap();
    let p = env.process(delays(vec![2.0], new_log(), Value::Int(1))).unwrap();

    env.run(Until::Exhausted).unwrap();

    assert_eq!(env.event_state(t), Err(SimError::UnknownEvent(t)));
    // Completions stay queryable.
    assert_eq!(env.process_outcome(p).unwrap(), Some(&Ok(Value::Int(1))));
}

#[test]
fn test_start_time_from_config() {
    let mut env = Environment::with_config(EnvConfig::new().starting_at(SimTime::new(50.0)));
    env.timeout(5.0).unwrap();
    env.run(Until::Exhausted).unwrap();
    assert_eq!(env.now(), SimTime::new(55.0));
}
