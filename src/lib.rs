//! swarmq - a persistent, dependency-aware task scheduler for agent swarms
//!
//! Clients submit units of work with declared prerequisites; the
//! scheduler guarantees a unit only becomes eligible once every
//! prerequisite has finished, claims eligible units in priority order,
//! bounds how many run concurrently, and survives process restarts
//! without losing or duplicating work.

pub mod domain;
pub mod error;
pub mod id;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod swarm;

pub use error::{Result, SwarmError};
