//! Shared value types for the mechspace crates.

mod types;

pub use types::{JointWrench, LinkId, ModelId, SpatialForce, Transform};
