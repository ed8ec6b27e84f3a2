//! Gear couplings between mobilizer rates.

use crate::tree::MobilizerId;
use glam::{DQuat, DVec3};
use mechspace_common::{LinkId, Transform};
use mechspace_joint::SpringDamper;
use mechspace_joint::frame::twist_angle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CouplingId(pub u64);

/// Velocity coupling `(ω_child − ω_ref)·a1 = ratio · (ω_parent − ω_ref)·a0`
/// enforced by projecting the rates of the two mobilizers that carry the
/// parent and child links.
#[derive(Debug, Clone)]
pub struct GearCoupling {
    pub name: String,
    pub parent: Option<LinkId>,
    pub child: Option<LinkId>,
    /// Mobilizer whose outboard body is the parent link.
    pub driver: Option<MobilizerId>,
    /// Mobilizer whose outboard body is the child link.
    pub driven: Option<MobilizerId>,
    pub ratio: f64,
    pub reference: Option<LinkId>,
    /// Reference frame pose at the last derivation.
    pub frame: Transform,
    /// Axes in `frame`.
    pub axes: [DVec3; 2],
    /// Parent and child orientation relative to the reference at derivation.
    pub rel0: [DQuat; 2],
    pub effort: [f64; 2],
    pub springs: [SpringDamper; 2],
    /// Constraint impulse accumulated during the last step.
    pub impulse: f64,
}

impl GearCoupling {
    pub fn new(name: &str, parent: Option<LinkId>, child: Option<LinkId>, mobilizers: [Option<MobilizerId>; 2]) -> Self {
        Self {
            name: name.to_owned(),
            parent,
            child,
            driver: mobilizers[0],
            driven: mobilizers[1],
            ratio: 1.0,
            reference: None,
            frame: Transform::IDENTITY,
            axes: [DVec3::Z; 2],
            rel0: [DQuat::IDENTITY; 2],
            effort: [0.0; 2],
            springs: [SpringDamper::default(); 2],
            impulse: 0.0,
        }
    }

    /// Re-express the world axes in the reference body's current frame and
    /// record the rest orientations against it.
    pub fn derive(
        &mut self,
        ratio: f64,
        reference: Option<LinkId>,
        frame: Transform,
        world_axes: [DVec3; 2],
        rotations: [DQuat; 2],
    ) {
        self.ratio = ratio;
        self.reference = reference;
        self.frame = frame;
        self.axes = world_axes.map(|a| frame.inverse_rotate_vector(a).normalize_or_zero());
        let inv = frame.rotation.inverse();
        self.rel0 = rotations.map(|r| inv * r);
    }

    pub fn world_axis(&self, frame: Transform, index: usize) -> DVec3 {
        frame.rotation * self.axes[index]
    }

    /// Rotation of the parent (0) or child (1) about its axis relative to
    /// the reference since derivation.
    pub fn angle(&self, frame: Transform, rotation: DQuat, index: usize) -> f64 {
        let rel = frame.rotation.inverse() * rotation;
        twist_angle(rel, self.rel0[index], self.axes[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn axes_follow_the_reference_frame() {
        let mut gear = GearCoupling::new("g", Some(LinkId(1)), Some(LinkId(2)), [None, None]);
        let carrier = Transform::from_rotation(DQuat::from_rotation_x(FRAC_PI_2));
        gear.derive(2.0, Some(LinkId(3)), carrier, [DVec3::Z; 2], [DQuat::IDENTITY; 2]);
        assert_relative_eq!(gear.axes[0].y, 1.0, epsilon = 1e-12);
        assert!(gear.world_axis(carrier, 1).abs_diff_eq(DVec3::Z, 1e-12));
        assert_eq!(gear.ratio, 2.0);
    }

    #[test]
    fn angle_measures_twist_since_derivation() {
        let mut gear = GearCoupling::new("g", None, Some(LinkId(2)), [None, None]);
        gear.derive(1.0, None, Transform::IDENTITY, [DVec3::Z; 2], [DQuat::IDENTITY; 2]);
        let turned = DQuat::from_rotation_z(0.3);
        assert_relative_eq!(gear.angle(Transform::IDENTITY, turned, 1), 0.3, epsilon = 1e-12);
    }
}
