//! Mechanism kernel: the Model/World arena that owns links, plus the
//! monotonic simulation clock.
//!
//! # Invariants
//! - Links are owned here, never by joints or back-ends; everyone else holds ids.
//! - A removed link id never resolves again.
//! - Simulation time is monotonically non-decreasing.

pub mod world;

pub use world::{Link, Model, World, WorldConfig, WorldEvent};

pub fn crate_info() -> &'static str {
    "mechspace-kernel v0.1.0"
}
