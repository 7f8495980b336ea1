//! Property tests for calendar ordering and clock monotonicity, driven
//! through the public API only.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use tempo::{EnvConfig, Environment, EventKind, Priority, ProcessState, Resume, SimResult, SimTime, Step, Until, Value};

fn traced() -> Environment {
    Environment::with_config(EnvConfig::new().with_trace())
}

proptest! {
    // Timeouts created at the same instant fire sorted by
    // (time, priority, creation order).
    #[test]
    fn timeouts_fire_in_calendar_order(
        specs in prop::collection::vec((0u32..20, prop::bool::ANY), 1..60)
    ) {
        let mut env = traced();
        let mut expected = Vec::new();
        for (i, (delay, urgent)) in specs.iter().enumerate() {
            let priority = if *urgent { Priority::URGENT } else { Priority::NORMAL };
            let id = env
                .timeout_with_priority(f64::from(*delay) * 0.5, Value::Empty, priority)
                .unwrap();
            expected.push((*delay, priority, i, id));
        }
        expected.sort_by_key(|(delay, priority, i, _)| (*delay, *priority, *i));

        env.run(Until::Exhausted).unwrap();

        let order = env.trace().unwrap().event_order();
        let expected: Vec<_> = expected.into_iter().map(|(_, _, _, id)| id).collect();
        prop_assert_eq!(order, expected);
    }

    // However processes interleave, the clock observed by each resume and
    // by the trace never goes backwards.
    #[test]
    fn clock_never_decreases(
        scripts in prop::collection::vec(prop::collection::vec(0u32..10, 0..8), 1..8)
    ) {
        let mut env = traced();
        let seen: Rc<RefCell<Vec<SimTime>>> = Rc::new(RefCell::new(Vec::new()));
        let mut pids = Vec::new();

        for script in scripts {
            let seen = Rc::clone(&seen);
            let mut next = 0;
            let pid = env.process(move |env: &mut Environment, _input: Resume| -> SimResult<Step> {
                seen.borrow_mut().push(env.now());
                if next == script.len() {
                    return Ok(Step::done());
                }
                next += 1;
                Ok(Step::wait(env.timeout(f64::from(script[next - 1]))?))
            })
            .unwrap();
            pids.push(pid);
        }
        env.run(Until::Exhausted).unwrap();

        let seen = seen.borrow();
        prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        let entries = env.trace().unwrap().entries();
        prop_assert!(entries.windows(2).all(|w| w[0].time <= w[1].time));
        let completions = entries
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Completion(_)))
            .count();
        prop_assert_eq!(completions, pids.len());
        for pid in pids {
            prop_assert_eq!(env.process_state(pid).unwrap(), ProcessState::Completed);
        }
    }

    // A time horizon never processes anything later than itself.
    #[test]
    fn horizon_is_respected(delays in prop::collection::vec(0u32..100, 1..40), horizon in 0u32..100) {
        let mut env = traced();
        for d in &delays {
            env.timeout(f64::from(*d)).unwrap();
        }
        let horizon = f64::from(horizon);
        env.run(horizon).unwrap();

        prop_assert_eq!(env.now(), SimTime::new(horizon));
        let processed = env.trace().unwrap().len();
        let due = delays.iter().filter(|d| f64::from(**d) <= horizon).count();
        prop_assert_eq!(processed, due);
        prop_assert_eq!(env.pending_count(), delays.len() - due);
    }
}
