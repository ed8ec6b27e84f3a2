//! Backend-agnostic joint contract: lifecycle, actuation bookkeeping,
//! spring/damper parameters, frame resolution and reaction wrenches.
//!
//! Back-ends plug in through [`BackendAdapter`]; everything else is written
//! once here.
//!
//! # Invariants
//! - The angle count of a joint never changes after construction.
//! - Actuation totals are per simulation time and reset when time advances.
//! - `reversed` is fixed at assembly and only remaps reaction halves.
//! - Per-call failures never abort; they log, record a notice and return a
//!   neutral default.

pub mod adapter;
pub mod core;
pub mod description;
pub mod error;
pub mod frame;
pub mod gearbox;
pub mod hinge;
pub mod joint;

pub use adapter::{
    Assembly, AssemblySpec, BackendAdapter, CouplingGeometry, GearSpec, PhysicsEngine, Reaction,
    Simulation, SpringDamper, unsupported,
};
pub use core::{ForceAccumulator, JointCore, JointState, NOTICE_CAPACITY};
pub use description::{AxisDescription, AxisLimit, JointDescription, JointKind, WORLD_FRAME};
pub use error::{JointError, JointNotice, LoadError};
pub use gearbox::{DEFAULT_GEAR_RATIO, GearboxJoint};
pub use hinge::HingeJoint;
pub use joint::{AxisParam, Joint};

pub fn crate_info() -> &'static str {
    "mechspace-joint v0.1.0"
}
