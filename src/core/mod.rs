//! Core library modules for lcp-toolbox
//!
//! Point handling, neighbour selection, path accumulation and lane
//! scheduling, plus the command layer that reaches GRASS.

pub mod accumulator;
pub mod algebra;
pub mod config;
pub mod context;
pub mod distance;
pub mod error;
pub mod gis;
pub mod neighbours;
pub mod points;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod memory;

// Re-export main types for internal use
pub use accumulator::PathAccumulator;
pub use context::RunContext;
pub use gis::{Gis, GisCommand, GrassSession};
pub use scheduler::{Lane, LaneOutput, LaneState, LaneWork, Scheduler};
