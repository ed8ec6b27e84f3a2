//! Maximal-coordinate back-end: every link is a free rigid body and joints
//! are enforced by sequential constraint impulses.
//!
//! # Invariants
//! - The kernel world stays authoritative for poses; bodies are re-synced at
//!   the start of every step and integrated poses are written back.
//! - Native joints never reverse: body1 is the parent, body2 the child.
//! - Actuation is consumed by the step that follows it.

pub mod adapter;
pub mod body;
pub mod config;
pub mod constraint;
pub mod engine;

pub use adapter::MaximalAdapter;
pub use body::{Bodies, Body};
pub use config::MaximalConfig;
pub use constraint::{GearGeometry, HingeGeometry, NativeJoint, NativeJointId, NativeKind};
pub use engine::{MaximalEngine, StepStats};

pub fn crate_info() -> &'static str {
    "mechspace-maximal v0.1.0"
}
