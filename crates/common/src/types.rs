use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use std::ops::{Mul, Neg};

/// Key of a link in the world arena.
///
/// Ids are allocated monotonically and never reused, so a stale id simply
/// stops resolving once its link is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

/// Key of a model in the world arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub u64);

/// Rigid transform: position plus orientation.
///
/// `a * b` maps a point from `b`'s frame through `b` and then `a`, so
/// `world_from_child = world_from_parent * parent_from_child`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            rotation: DQuat::IDENTITY,
        }
    }

    pub fn from_rotation(rotation: DQuat) -> Self {
        Self {
            position: DVec3::ZERO,
            rotation,
        }
    }

    /// The transform that undoes `self`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            position: -(rotation * self.position),
            rotation,
        }
    }

    /// `self * other`.
    pub fn compose(&self, other: &Transform) -> Self {
        Self {
            position: self.position + self.rotation * other.position,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.position + self.rotation * point
    }

    pub fn rotate_vector(&self, v: DVec3) -> DVec3 {
        self.rotation * v
    }

    /// Re-express a vector given in the outer frame in this transform's frame.
    pub fn inverse_rotate_vector(&self, v: DVec3) -> DVec3 {
        self.rotation.inverse() * v
    }

    /// Component-wise comparison; orientations `q` and `-q` are treated as equal.
    pub fn abs_diff_eq(&self, other: &Transform, max_abs_diff: f64) -> bool {
        self.position.abs_diff_eq(other.position, max_abs_diff)
            && (self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
                || self.rotation.abs_diff_eq(-other.rotation, max_abs_diff))
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

/// Torque/force pair as a back-end reports it, expressed in the ground frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialForce {
    pub torque: DVec3,
    pub force: DVec3,
}

impl SpatialForce {
    pub const ZERO: Self = Self {
        torque: DVec3::ZERO,
        force: DVec3::ZERO,
    };

    pub fn new(torque: DVec3, force: DVec3) -> Self {
        Self { torque, force }
    }
}

impl Neg for SpatialForce {
    type Output = SpatialForce;

    fn neg(self) -> SpatialForce {
        SpatialForce {
            torque: -self.torque,
            force: -self.force,
        }
    }
}

/// Reaction wrench of a joint.
///
/// `body1` is the parent attachment and `body2` the child attachment. Each pair
/// is expressed in its own body's local frame and gives the force exerted by
/// that body on the joint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointWrench {
    pub body1_force: DVec3,
    pub body1_torque: DVec3,
    pub body2_force: DVec3,
    pub body2_torque: DVec3,
}

impl JointWrench {
    pub const ZERO: Self = Self {
        body1_force: DVec3::ZERO,
        body1_torque: DVec3::ZERO,
        body2_force: DVec3::ZERO,
        body2_torque: DVec3::ZERO,
    };
}
