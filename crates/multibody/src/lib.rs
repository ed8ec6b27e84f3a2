//! Reduced-coordinate back-end: links hang off a forest of revolute
//! mobilizers and are integrated in joint space.
//!
//! # Invariants
//! - Tree topology is fixed when a mobilizer is added. A mobilizer whose
//!   inboard body is the joint's child is reversed, and stays reversed.
//! - Links without an inboard mobilizer are welded to ground.
//! - Forward kinematics writes every mobilized link's pose back to the kernel
//!   after each step.
//! - Point anchors are not expressible and report `Unsupported`.

pub mod adapter;
pub mod config;
pub mod coupling;
pub mod engine;
pub mod tree;

pub use adapter::MultibodyAdapter;
pub use config::MultibodyConfig;
pub use coupling::{CouplingId, GearCoupling};
pub use engine::{MultibodyEngine, StepStats};
pub use tree::{BodyState, Mobilizer, MobilizerId, Placement, TopologyError, Tree};

pub fn crate_info() -> &'static str {
    "mechspace-multibody v0.1.0"
}
