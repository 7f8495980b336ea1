//! # Tempo: process-oriented discrete-event simulation
//!
//! A single-threaded simulation kernel. Work is expressed as processes,
//! resumable state machines that wait on events; the environment pops
//! events in `(time, priority, sequence)` order and resumes whoever waits
//! on them. No async, no threads, no wall-clock time.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────┐
//! │        Environment         │ ← clock, run/step loop
//! │  ┌──────────────────────┐  │
//! │  │      Processes       │  │ ← Computation state machines
//! │  └──────────┬───────────┘  │
//! │        wait │ resume        │
//! │  ┌──────────▼───────────┐  │
//! │  │       Events         │  │ ← Pending → Triggered → Processed
//! │  └──────────┬───────────┘  │
//! │  ┌──────────▼───────────┐  │
//! │  │      Calendar        │  │ ← min-heap by (time, priority, seq)
//! │  └──────────────────────┘  │
//! │  ┌──────────────────────┐  │
//! │  │      SimTime         │  │ ← virtual clock
//! │  └──────────────────────┘  │
//! └────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tempo::{Environment, Resume, SimResult, Step, Until, Value};
//!
//! let mut env = Environment::new();
//! let mut started = false;
//! let pid = env
//!     .process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
//!         if !started {
//!             started = true;
//!             return Ok(Step::wait(env.timeout(2.5)?));
//!         }
//!         Ok(Step::ret(input.into_result().is_ok()))
//!     })
//!     .unwrap();
//!
//! env.run(Until::Exhausted).unwrap();
//! assert_eq!(env.now().as_f64(), 2.5);
//! assert_eq!(env.process_outcome(pid).unwrap(), Some(&Ok(Value::Bool(true))));
//! ```

pub mod calendar;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod models;
pub mod process;
pub mod time;
pub mod trace;
pub mod value;

// Re-exports for convenience.
pub use calendar::{Calendar, CalendarEntry};
pub use config::EnvConfig;
pub use environment::{Environment, Until};
pub use error::{SimError, SimResult};
pub use event::{Callback, Event, EventId, EventKind, EventState, Priority};
pub use process::{Awaitable, Computation, Process, ProcessId, ProcessState, Resume, Step};
pub use time::SimTime;
pub use trace::{EventTrace, TraceEntry};
pub use value::{Failure, Outcome, Value};
