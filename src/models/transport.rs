//! Trucks shuttling between a source node and scattered demand nodes.
//!
//! Every node runs a worker that serves the trucks queued at it, one at a
//! time; a router sends idle trucks to a random node of the right kind.
//! Loaded trucks go to a demand node to unload, empty ones go back to a
//! source to load.
//!
//! ```text
//!   Router ──spawn──▶ Trip ──▶ Dwell(exit) ─▶ timeout(dist/speed) ─▶ Dwell(enter)
//!                                                                       │ queue
//!   NodeWorker ◀────────────────────────────────────────────────────────┘
//!        └──spawn──▶ Service ──▶ timeout | load/unload chore
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::config::EnvConfig;
use crate::environment::Environment;
use crate::error::SimResult;
use crate::models::{ModelError, ModelResult, SharedRng};
use crate::process::{Computation, ProcessId, Resume, Step};
use crate::time::SimTime;

// ── Clock ─────────────────────────────────────────────────────────────

/// Maps virtual seconds to calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    start: DateTime<Utc>,
}

impl Clock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Clock { start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The date `now` seconds after the start.
    pub fn date_at(&self, now: SimTime) -> DateTime<Utc> {
        let millis = (now.as_f64() * 1000.0).round() as i64;
        self.start
            .checked_add_signed(Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for Clock {
    /// Midnight, 1 January 2024 (UTC).
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Clock::new(start)
    }
}

// ── Configuration ─────────────────────────────────────────────────────

/// Where demand nodes sit. The source node is always at the origin.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Fixed(Vec<(f64, f64)>),
    /// `count` nodes drawn uniformly from `[-extent, extent)` on each axis.
    Scattered { count: usize, extent: f64 },
}

/// How a node serves a truck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Handling {
    /// The node spends a uniformly drawn time in `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// The truck runs its own load or unload sub-process of fixed length.
    Fixed { load: f64, unload: f64 },
}

/// How the router hands out trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Await each trip before looking at the next truck.
    Blocking,
    /// Start the trip and move on after one tick.
    Concurrent,
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Blocking => write!(f, "blocking"),
            Dispatch::Concurrent => write!(f, "concurrent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub trucks: usize,
    pub layout: Layout,
    /// Distance units per time unit.
    pub speed: f64,
    pub handling: Handling,
    pub dispatch: Dispatch,
    /// Router wait between looks at the fleet.
    pub router_tick: f64,
    /// Node worker wait while its queue is empty.
    pub node_poll: f64,
    /// Time spent entering or leaving a node.
    pub dwell: f64,
    pub horizon: f64,
    /// Stamp logs and the report with calendar dates.
    pub clock: Option<Clock>,
}

impl TransportConfig {
    /// One truck between the source and a single demand node at (10, 10),
    /// served in 5 to 10 time units, with a blocking router.
    pub fn basic() -> Self {
        TransportConfig {
            trucks: 1,
            layout: Layout::Fixed(vec![(10.0, 10.0)]),
            speed: 1.0,
            handling: Handling::Uniform { low: 5.0, high: 10.0 },
            dispatch: Dispatch::Blocking,
            router_tick: 1.0,
            node_poll: 1.0,
            dwell: 1.0,
            horizon: 1000.0,
            clock: None,
        }
    }

    /// A fleet on scattered nodes with time in seconds: 100 km/h trucks,
    /// five-minute loads and unloads, a concurrent router, one day long.
    pub fn scheduled(trucks: usize, demand_nodes: usize) -> Self {
        TransportConfig {
            trucks,
            layout: Layout::Scattered {
                count: demand_nodes,
                extent: 10.0,
            },
            speed: 100.0 / 3600.0,
            handling: Handling::Fixed {
                load: 5.0 * 60.0,
                unload: 5.0 * 60.0,
            },
            dispatch: Dispatch::Concurrent,
            router_tick: 0.1,
            node_poll: 1.0,
            dwell: 1.0,
            horizon: 24.0 * 60.0 * 60.0,
            clock: Some(Clock::default()),
        }
    }

    fn validate(&self) -> ModelResult<()> {
        let demand = match &self.layout {
            Layout::Fixed(points) => points.len(),
            Layout::Scattered { count, extent } => {
                if !(extent.is_finite() && *extent > 0.0) {
                    return Err(ModelError::InvalidConfig(format!("extent must be positive, got {extent}")));
                }
                *count
            }
        };
        if self.trucks == 0 {
            return Err(ModelError::InvalidConfig("at least one truck is required".into()));
        }
        if demand == 0 {
            return Err(ModelError::InvalidConfig("at least one demand node is required".into()));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ModelError::InvalidConfig(format!("speed must be positive, got {}", self.speed)));
        }
        if self.router_tick <= 0.0 || self.node_poll <= 0.0 {
            return Err(ModelError::InvalidConfig("polling intervals must be positive".into()));
        }
        if let Handling::Uniform { low, high } = self.handling {
            if !(low >= 0.0 && low < high) {
                return Err(ModelError::InvalidConfig(format!("bad handling range [{low}, {high})")));
            }
        }
        Ok(())
    }
}

// ── World ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Source,
    Demand,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Source => write!(f, "source"),
            NodeRole::Demand => write!(f, "demand"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Number within its role.
    pub id: u32,
    pub role: NodeRole,
    pub x: f64,
    pub y: f64,
    /// Trucks loaded (source) or unloaded (demand) here.
    pub served: u32,
    queue: VecDeque<usize>,
}

impl Node {
    fn new(id: u32, role: NodeRole, x: f64, y: f64) -> Self {
        Node {
            id,
            role,
            x,
            y,
            served: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.role, self.id)
    }

    fn distance_to(&self, other: &Node) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct Truck {
    pub id: u32,
    /// Index of the node it is at or heading from.
    pub at: usize,
    pub loaded: bool,
    pub idle: bool,
    pub trips: u32,
}

#[derive(Debug, Default)]
struct World {
    nodes: Vec<Node>,
    trucks: Vec<Truck>,
}

impl World {
    fn nodes_with(&self, role: NodeRole) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.role == role)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Handles shared by every process of one run.
#[derive(Clone)]
struct Ctx {
    world: Rc<RefCell<World>>,
    rng: SharedRng,
    config: Rc<TransportConfig>,
}

impl Ctx {
    fn stamp(&self, now: SimTime) -> String {
        match &self.config.clock {
            Some(clock) => clock.date_at(now).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{:.2}", now.as_f64()),
        }
    }

    fn node_label(&self, node: usize) -> String {
        self.world.borrow().nodes[node].label()
    }
}

// ── Processes ─────────────────────────────────────────────────────────

/// Entering or leaving a node. Entering also joins the node's queue.
struct Dwell {
    ctx: Ctx,
    truck: usize,
    node: usize,
    entering: bool,
    started: bool,
}

impl Computation for Dwell {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if self.started {
            return Ok(Step::from(input.into_result()));
        }
        self.started = true;
        let at = self.ctx.stamp(env.now());
        let node = self.ctx.node_label(self.node);
        if self.entering {
            info!(%at, truck = self.truck, %node, "entered node");
            self.ctx.world.borrow_mut().nodes[self.node].queue.push_back(self.truck);
        } else {
            info!(%at, truck = self.truck, %node, "exited node");
        }
        Ok(Step::wait(env.timeout(self.ctx.config.dwell)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Start,
    Leaving,
    Travelling,
    Arriving,
}

/// A truck moving from its current node to `to`.
struct Trip {
    ctx: Ctx,
    truck: usize,
    to: usize,
    leg: Leg,
}

impl Trip {
    fn dwell(&self, env: &mut Environment, node: usize, entering: bool) -> SimResult<ProcessId> {
        env.process(Dwell {
            ctx: self.ctx.clone(),
            truck: self.truck,
            node,
            entering,
            started: false,
        })
    }
}

impl Computation for Trip {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if let Resume::Failed(failure) = input {
            return Ok(Step::fail(failure));
        }
        match self.leg {
            Leg::Start => {
                let from = self.ctx.world.borrow().trucks[self.truck].at;
                self.leg = Leg::Leaving;
                Ok(Step::wait(self.dwell(env, from, false)?))
            }
            Leg::Leaving => {
                let distance = {
                    let world = self.ctx.world.borrow();
                    let from = &world.nodes[world.trucks[self.truck].at];
                    from.distance_to(&world.nodes[self.to])
                };
                let from = {
                    let world = self.ctx.world.borrow();
                    world.nodes[world.trucks[self.truck].at].label()
                };
                info!(
                    at = %self.ctx.stamp(env.now()),
                    truck = self.truck,
                    %from,
                    to = %self.ctx.node_label(self.to),
                    distance,
                    "moving"
                );
                self.leg = Leg::Travelling;
                Ok(Step::wait(env.timeout(distance / self.ctx.config.speed)?))
            }
            Leg::Travelling => {
                self.ctx.world.borrow_mut().trucks[self.truck].at = self.to;
                self.leg = Leg::Arriving;
                Ok(Step::wait(self.dwell(env, self.to, true)?))
            }
            Leg::Arriving => {
                self.ctx.world.borrow_mut().trucks[self.truck].trips += 1;
                Ok(Step::done())
            }
        }
    }
}

/// A node loading or unloading one truck.
struct Service {
    ctx: Ctx,
    node: usize,
    truck: usize,
    started: bool,
}

impl Service {
    /// Fixed-length load or unload run as the truck's own sub-process.
    fn chore(env: &mut Environment, duration: f64) -> SimResult<ProcessId> {
        let mut waited = false;
        env.process(move |env: &mut Environment, input: Resume| -> SimResult<Step> {
            if !waited {
                waited = true;
                return Ok(Step::wait(env.timeout(duration)?));
            }
            Ok(Step::from(input.into_result()))
        })
    }
}

impl Computation for Service {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        let role = self.ctx.world.borrow().nodes[self.node].role;
        if !self.started {
            self.started = true;
            info!(
                at = %self.ctx.stamp(env.now()),
                truck = self.truck,
                node = %self.ctx.node_label(self.node),
                "processing"
            );
            return match self.ctx.config.handling {
                Handling::Uniform { low, high } => {
                    let delay = self.ctx.rng.borrow_mut().gen_range(low..high);
                    Ok(Step::wait(env.timeout(delay)?))
                }
                Handling::Fixed { load, unload } => {
                    let duration = match role {
                        NodeRole::Source => load,
                        NodeRole::Demand => unload,
                    };
                    Ok(Step::wait(Self::chore(env, duration)?))
                }
            };
        }
        if let Err(failure) = input.into_result() {
            return Ok(Step::fail(failure));
        }
        let mut world = self.ctx.world.borrow_mut();
        world.nodes[self.node].served += 1;
        world.trucks[self.truck].loaded = role == NodeRole::Source;
        Ok(Step::ret(self.truck))
    }
}

/// Serves the trucks queued at one node, in arrival order.
struct NodeWorker {
    ctx: Ctx,
    node: usize,
    serving: Option<usize>,
}

impl Computation for NodeWorker {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if let Some(truck) = self.serving.take() {
            if let Err(failure) = input.into_result() {
                return Ok(Step::fail(failure));
            }
            let mut world = self.ctx.world.borrow_mut();
            world.nodes[self.node].queue.pop_front();
            world.trucks[truck].idle = true;
        }

        let next = self.ctx.world.borrow().nodes[self.node].queue.front().copied();
        match next {
            Some(truck) => {
                self.serving = Some(truck);
                let service = env.process(Service {
                    ctx: self.ctx.clone(),
                    node: self.node,
                    truck,
                    started: false,
                })?;
                Ok(Step::wait(service))
            }
            None => Ok(Step::wait(env.timeout(self.ctx.config.node_poll)?)),
        }
    }
}

/// Sends idle trucks to a random node of the kind they need.
struct Router {
    ctx: Ctx,
    cursor: usize,
}

impl Computation for Router {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if let Resume::Failed(failure) = input {
            return Ok(Step::fail(failure));
        }
        let truck = self.cursor;
        self.cursor = (self.cursor + 1) % self.ctx.config.trucks;

        let destination = {
            let mut world = self.ctx.world.borrow_mut();
            if world.trucks[truck].idle {
                let role = if world.trucks[truck].loaded {
                    NodeRole::Demand
                } else {
                    NodeRole::Source
                };
                let candidates = world.nodes_with(role);
                let pick = self.ctx.rng.borrow_mut().gen_range(0..candidates.len());
                world.trucks[truck].idle = false;
                Some(candidates[pick])
            } else {
                None
            }
        };

        let Some(to) = destination else {
            return Ok(Step::wait(env.timeout(self.ctx.config.router_tick)?));
        };
        debug!(truck, to = %self.ctx.node_label(to), dispatch = %self.ctx.config.dispatch, "dispatch");
        let trip = env.process(Trip {
            ctx: self.ctx.clone(),
            truck,
            to,
            leg: Leg::Start,
        })?;
        match self.ctx.config.dispatch {
            Dispatch::Blocking => Ok(Step::wait(trip)),
            Dispatch::Concurrent => Ok(Step::wait(env.timeout(self.ctx.config.router_tick)?)),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub served: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportReport {
    pub nodes: Vec<NodeSummary>,
    /// Completed trips per truck.
    pub trips: Vec<u32>,
    pub finished_at: SimTime,
    pub end_date: Option<DateTime<Utc>>,
}

impl TransportReport {
    pub fn loads(&self) -> u32 {
        self.served_by("source")
    }

    pub fn unloads(&self) -> u32 {
        self.served_by("demand")
    }

    fn served_by(&self, role: &str) -> u32 {
        self.nodes
            .iter()
            .filter(|n| n.label.starts_with(role))
            .map(|n| n.served)
            .sum()
    }
}

/// Build the world, run it until the configured horizon, and summarise.
pub fn run_transport(config: TransportConfig, rng: SharedRng) -> ModelResult<TransportReport> {
    config.validate()?;

    let mut world = World::default();
    match &config.layout {
        Layout::Fixed(points) => {
            for (i, (x, y)) in points.iter().enumerate() {
                world.nodes.push(Node::new(i as u32, NodeRole::Demand, *x, *y));
            }
        }
        Layout::Scattered { count, extent } => {
            let mut rng = rng.borrow_mut();
            for i in 0..*count {
                let x = rng.gen_range(-extent..*extent);
                let y = rng.gen_range(-extent..*extent);
                world.nodes.push(Node::new(i as u32, NodeRole::Demand, x, y));
            }
        }
    }
    let source = world.nodes.len();
    world.nodes.push(Node::new(0, NodeRole::Source, 0.0, 0.0));
    for i in 0..config.trucks {
        world.trucks.push(Truck {
            id: i as u32,
            at: source,
            loaded: true,
            idle: true,
            trips: 0,
        });
    }

    let node_count = world.nodes.len();
    let horizon = config.horizon;
    let ctx = Ctx {
        world: Rc::new(RefCell::new(world)),
        rng,
        config: Rc::new(config),
    };

    // Only completions are awaited after the fact.
    let mut env = Environment::with_config(EnvConfig::new().release_processed());
    for node in 0..node_count {
        let name = ctx.node_label(node);
        env.process_named(
            name,
            NodeWorker {
                ctx: ctx.clone(),
                node,
                serving: None,
            },
        )?;
    }
    env.process_named(
        "router",
        Router {
            ctx: ctx.clone(),
            cursor: 0,
        },
    )?;
    env.run(horizon)?;

    let world = ctx.world.borrow();
    let report = TransportReport {
        nodes: world
            .nodes
            .iter()
            .map(|n| NodeSummary {
                label: n.label(),
                x: n.x,
                y: n.y,
                served: n.served,
            })
            .collect(),
        trips: world.trucks.iter().map(|t| t.trips).collect(),
        finished_at: env.now(),
        end_date: ctx.config.clock.map(|c| c.date_at(env.now())),
    };
    info!(
        loads = report.loads(),
        unloads = report.unloads(),
        at = %ctx.stamp(env.now()),
        "transport finished"
    );
    Ok(report)
}
