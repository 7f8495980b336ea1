//! The smallest possible models: one process awaiting one timeout.

use tracing::info;

use crate::environment::{Environment, Until};
use crate::error::SimResult;
use crate::process::{Computation, ProcessId, Resume, Step};
use crate::time::SimTime;
use crate::value::Value;

/// Spawn a process that waits on `timeout(1, value = 42)` and returns the
/// value it received.
pub fn spawn_intro(env: &mut Environment) -> SimResult<ProcessId> {
    let mut waited = false;
    env.process_named("intro", move |env: &mut Environment, input: Resume| -> SimResult<Step> {
        if !waited {
            waited = true;
            return Ok(Step::wait(env.timeout_with(1.0, 42)?));
        }
        let value = match input.into_result() {
            Ok(value) => value,
            Err(failure) => return Ok(Step::fail(failure)),
        };
        info!(now = %env.now(), %value, "timeout fired");
        Ok(Step::ret(value))
    })
}

/// Run the intro model to exhaustion. Returns the final clock and the
/// value the process saw.
pub fn run_intro() -> SimResult<(SimTime, Value)> {
    let mut env = Environment::new();
    let pid = spawn_intro(&mut env)?;
    env.run(Until::Exhausted)?;
    let value = match env.process_outcome(pid)? {
        Some(Ok(value)) => value.clone(),
        _ => Value::Empty,
    };
    Ok((env.now(), value))
}

// ── Class-style variant ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Before,
    After,
}

/// The same model written as a struct: waits `delay` for the value 42,
/// logging before and after.
#[derive(Debug, Clone)]
pub struct DelayedAnswer {
    delay: f64,
    stage: Stage,
}

impl DelayedAnswer {
    pub fn new(delay: f64) -> Self {
        DelayedAnswer {
            delay,
            stage: Stage::Before,
        }
    }
}

impl Default for DelayedAnswer {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl Computation for DelayedAnswer {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        match self.stage {
            Stage::Before => {
                info!(now = %env.now(), "before timeout");
                self.stage = Stage::After;
                Ok(Step::wait(env.timeout_with(self.delay, 42)?))
            }
            Stage::After => {
                let outcome = input.into_result();
                if let Ok(value) = &outcome {
                    info!(now = %env.now(), %value, "after timeout");
                }
                Ok(Step::from(outcome))
            }
        }
    }
}

/// Run [`DelayedAnswer`] with the given delay.
pub fn run_delayed(delay: f64) -> SimResult<(SimTime, Value)> {
    let mut env = Environment::new();
    let pid = env.process_named("delayed-answer", DelayedAnswer::new(delay))?;
    env.run(pid)?;
    let value = match env.process_outcome(pid)? {
        Some(Ok(value)) => value.clone(),
        _ => Value::Empty,
    };
    Ok((env.now(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intro_sees_42_at_one() {
        let (now, value) = run_intro().unwrap();
        assert_eq!(now, SimTime::new(1.0));
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_delayed_answer() {
        let (now, value) = run_delayed(10.0).unwrap();
        assert_eq!(now, SimTime::new(10.0));
        assert_eq!(value.as_int(), Some(42));

        let (now, _) = run_delayed(0.0).unwrap();
        assert_eq!(now, SimTime::ZERO);
    }

    #[test]
    fn test_delayed_answer_rejects_negative_delay() {
        assert!(run_delayed(-1.0).is_err());
    }
}
