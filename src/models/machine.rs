//! A single machine working through a batch of products, one at a time.
//!
//! Each product is handled by its own sub-process; the production line
//! awaits it before picking the next product according to a [`Policy`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use rand::Rng;
use rand_distr::{Distribution, Triangular};
use tracing::info;

use crate::environment::{Environment, Until};
use crate::error::SimResult;
use crate::models::{ModelError, ModelResult, SharedRng};
use crate::process::{Computation, ProcessId, Resume, Step};
use crate::time::SimTime;
use crate::value::{Failure, Value};

// ── Policy ────────────────────────────────────────────────────────────

/// Which pending product the machine takes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Policy {
    Random,
    Fifo,
    Lifo,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Random, Policy::Fifo, Policy::Lifo];

    fn pick<R: Rng>(self, pending: usize, rng: &mut R) -> usize {
        match self {
            Policy::Random => rng.gen_range(0..pending),
            Policy::Fifo => 0,
            Policy::Lifo => pending - 1,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Random => write!(f, "random"),
            Policy::Fifo => write!(f, "fifo"),
            Policy::Lifo => write!(f, "lifo"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Policy::Random),
            "fifo" => Ok(Policy::Fifo),
            "lifo" => Ok(Policy::Lifo),
            other => Err(format!("unknown policy `{other}` (expected random, fifo or lifo)")),
        }
    }
}

// ── Machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub id: u32,
    pub processed: bool,
}

impl Product {
    pub fn new(id: u32) -> Self {
        Product { id, processed: false }
    }
}

/// Processing times follow a triangular distribution `(low, mode, high)`.
#[derive(Debug, Clone)]
pub struct Machine {
    pub id: String,
    process_time: Triangular<f64>,
}

impl Machine {
    pub fn new(id: impl Into<String>, low: f64, mode: f64, high: f64) -> ModelResult<Self> {
        let process_time =
            Triangular::new(low, high, mode).map_err(|e| ModelError::Distribution(e.to_string()))?;
        Ok(Machine {
            id: id.into(),
            process_time,
        })
    }

    /// The stock machine: 10 to 20 time units, most likely 15.
    pub fn standard(id: impl Into<String>) -> ModelResult<Self> {
        Self::new(id, 10.0, 15.0, 20.0)
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        self.process_time.sample(rng)
    }
}

/// Sub-process working on one product.
struct Job {
    machine: Rc<Machine>,
    product: u32,
    rng: SharedRng,
    started: bool,
}

impl Computation for Job {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if !self.started {
            self.started = true;
            info!(machine = %self.machine.id, product = self.product, now = %env.now(), "processing product");
            let delay = self.machine.draw(&mut *self.rng.borrow_mut());
            return Ok(Step::wait(env.timeout(delay)?));
        }
        match input.into_result() {
            Ok(_) => Ok(Step::ret(i64::from(self.product))),
            Err(failure) => Ok(Step::fail(failure)),
        }
    }
}

// ── Production line ───────────────────────────────────────────────────

/// What a production run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionReport {
    pub policy: Policy,
    /// Processed products in completion order.
    pub processed: Vec<Product>,
    pub completed_at: Vec<SimTime>,
    pub finished_at: SimTime,
}

impl ProductionReport {
    pub fn order(&self) -> Vec<u32> {
        self.processed.iter().map(|p| p.id).collect()
    }
}

/// Works through `pending` one product at a time.
pub struct ProductionLine {
    machine: Rc<Machine>,
    policy: Policy,
    pending: Vec<Product>,
    current: Option<ProcessId>,
    rng: SharedRng,
    report: Rc<RefCell<Vec<(Product, SimTime)>>>,
}

impl ProductionLine {
    pub fn new(machine: Machine, policy: Policy, products: Vec<Product>, rng: SharedRng) -> Self {
        ProductionLine {
            machine: Rc::new(machine),
            policy,
            pending: products,
            current: None,
            rng,
            report: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle to the completion record, filled as products finish.
    pub fn completions(&self) -> Rc<RefCell<Vec<(Product, SimTime)>>> {
        Rc::clone(&self.report)
    }

    fn finish_current(&mut self, env: &Environment, value: Value) -> Result<(), Failure> {
        let id = value
            .as_int()
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| Failure::raised(format!("job returned {value}, expected a product id")))?;
        let idx = self
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Failure::raised(format!("product {id} is not pending")))?;
        let mut product = self.pending.remove(idx);
        product.processed = true;
        self.report.borrow_mut().push((product, env.now()));
        Ok(())
    }
}

impl Computation for ProductionLine {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if self.current.take().is_some() {
            let done = input.into_result().and_then(|value| self.finish_current(env, value));
            if let Err(failure) = done {
                return Ok(Step::fail(failure));
            }
        }

        if self.pending.is_empty() {
            let count = self.report.borrow().len();
            info!(machine = %self.machine.id, policy = %self.policy, count, now = %env.now(), "batch finished");
            return Ok(Step::ret(count));
        }

        let idx = self.policy.pick(self.pending.len(), &mut *self.rng.borrow_mut());
        let job = Job {
            machine: Rc::clone(&self.machine),
            product: self.pending[idx].id,
            rng: Rc::clone(&self.rng),
            started: false,
        };
        let pid = env.process_named(format!("job-{}", self.pending[idx].id), job)?;
        self.current = Some(pid);
        Ok(Step::wait(pid))
    }
}

/// Process `products` products numbered `0..products` under `policy`.
pub fn run_policy(policy: Policy, products: u32, rng: SharedRng) -> ModelResult<ProductionReport> {
    let mut env = Environment::new();
    let machine = Machine::standard("machine")?;
    let batch = (0..products).map(Product::new).collect();
    let line = ProductionLine::new(machine, policy, batch, rng);
    let completions = line.completions();
    env.process_named(format!("line-{policy}"), line)?;
    env.run(Until::Exhausted)?;

    let completions = completions.borrow();
    Ok(ProductionReport {
        policy,
        processed: completions.iter().map(|(p, _)| *p).collect(),
        completed_at: completions.iter().map(|(_, t)| *t).collect(),
        finished_at: env.now(),
    })
}
