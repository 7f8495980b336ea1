//! Client models built on the public kernel API.
//!
//! Each model is a set of [`Computation`](crate::Computation) state
//! machines plus a `run` entry point that builds an environment, seeds
//! it, and reports what happened. Randomness always comes from a seeded
//! [`StdRng`] handed in by the caller, so a model run is reproducible.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::SimError;

pub mod intro;
pub mod machine;
pub mod transport;
pub mod vehicle;

/// Generator shared by every process of one model run.
pub type SharedRng = Rc<RefCell<StdRng>>;

/// A shared generator seeded from `seed`.
pub fn seeded(seed: u64) -> SharedRng {
    Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
}

/// Errors raised while setting up or running a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid distribution parameters: {0}")]
    Distribution(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
