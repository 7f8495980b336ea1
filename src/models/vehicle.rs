//! A vehicle that drives until its tank is empty, refuels, and repeats
//! forever. Only a time horizon stops it.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use tracing::info;

use crate::environment::Environment;
use crate::error::SimResult;
use crate::models::SharedRng;
use crate::process::{Computation, Resume, Step};
use crate::time::SimTime;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleConfig {
    /// Lower bound of the drawn speed, inclusive.
    pub min_speed: u32,
    /// Upper bound of the drawn speed, exclusive.
    pub max_speed: u32,
    pub fuel_consumption: f64,
    pub fuel_capacity: u32,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig {
            min_speed: 80,
            max_speed: 100,
            fuel_consumption: 10.0,
            fuel_capacity: 35,
        }
    }
}

/// One drive, from a full (or refilled) tank to empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub start: SimTime,
    pub end: Option<SimTime>,
    pub fuel: u32,
    pub speed: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveLog {
    pub legs: Vec<Leg>,
    pub refuels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Parked,
    Driving,
    Refuelling,
}

/// Draw from `[lo, hi)`, or `lo` if the range is empty.
fn draw_int<R: Rng>(rng: &mut R, lo: u32, hi: u32) -> u32 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..hi)
    }
}

pub struct Vehicle {
    config: VehicleConfig,
    fuel: u32,
    phase: Phase,
    rng: SharedRng,
    log: Rc<RefCell<DriveLog>>,
}

impl Vehicle {
    pub fn new(config: VehicleConfig, rng: SharedRng) -> Self {
        Vehicle {
            fuel: config.fuel_capacity,
            config,
            phase: Phase::Parked,
            rng,
            log: Rc::new(RefCell::new(DriveLog::default())),
        }
    }

    /// Handle to the drive log, readable after the vehicle is moved into
    /// the environment.
    pub fn log(&self) -> Rc<RefCell<DriveLog>> {
        Rc::clone(&self.log)
    }

    fn start_driving(&mut self, env: &mut Environment) -> SimResult<Step> {
        let speed = draw_int(
            &mut *self.rng.borrow_mut(),
            self.config.min_speed,
            self.config.max_speed,
        );
        info!(now = %env.now(), fuel = self.fuel, speed, "start driving");
        let travel_time = self.fuel as f64 * self.config.fuel_consumption / speed.max(1) as f64;
        self.log.borrow_mut().legs.push(Leg {
            start: env.now(),
            end: None,
            fuel: self.fuel,
            speed,
        });
        self.phase = Phase::Driving;
        Ok(Step::wait(env.timeout(travel_time)?))
    }
}

impl Computation for Vehicle {
    fn resume(&mut self, env: &mut Environment, input: Resume) -> SimResult<Step> {
        if let Resume::Failed(failure) = input {
            return Ok(Step::fail(failure));
        }
        match self.phase {
            Phase::Parked => self.start_driving(env),
            Phase::Driving => {
                info!(now = %env.now(), "need refueling");
                if let Some(leg) = self.log.borrow_mut().legs.last_mut() {
                    leg.end = Some(env.now());
                }
                let refuel_time = self.rng.borrow_mut().gen_range(0.05..0.15);
                self.phase = Phase::Refuelling;
                Ok(Step::wait(env.timeout(refuel_time)?))
            }
            Phase::Refuelling => {
                let capacity = self.config.fuel_capacity;
                self.fuel = draw_int(&mut *self.rng.borrow_mut(), capacity.saturating_sub(5), capacity);
                self.log.borrow_mut().refuels += 1;
                info!(now = %env.now(), fuel = self.fuel, "finished refueling");
                self.start_driving(env)
            }
        }
    }
}

/// Drive one vehicle until `horizon`.
pub fn run_vehicle(config: VehicleConfig, rng: SharedRng, horizon: f64) -> SimResult<DriveLog> {
    let mut env = Environment::new();
    let vehicle = Vehicle::new(config, rng);
    let log = vehicle.log();
    env.process_named("vehicle", vehicle)?;
    env.run(horizon)?;
    let log = log.borrow().clone();
    Ok(log)
}
