//! Frame resolution and reaction-wrench re-expression.

use crate::adapter::Reaction;
use glam::{DQuat, DVec3};
use mechspace_common::{JointWrench, SpatialForce, Transform};

/// Derive the parent-to-joint transform so the joint frame is spatially
/// coincident with both endpoints as currently posed.
///
/// `parent_world`/`child_world` are `None` when that endpoint is the world.
pub fn parent_to_joint(
    parent_world: Option<Transform>,
    child_world: Option<Transform>,
    child_to_joint: Transform,
) -> Transform {
    let world_from_parent = parent_world.unwrap_or(Transform::IDENTITY);
    let world_from_child = child_world.unwrap_or(Transform::IDENTITY);
    world_from_parent.inverse() * world_from_child * child_to_joint
}

/// Joint frame in world coordinates, as seen from the child side.
pub fn joint_frame_in_world(child_world: Option<Transform>, child_to_joint: Transform) -> Transform {
    child_world.unwrap_or(Transform::IDENTITY) * child_to_joint
}

/// Map a back-end reaction onto the joint's parent/child attachments.
///
/// `reversed` swaps inboard/outboard. Each half is rotated from ground into
/// its body's own frame and negated, giving the force the body exerts on
/// the joint.
pub fn express_wrench(
    reaction: Reaction,
    reversed: bool,
    parent_rotation: DQuat,
    child_rotation: DQuat,
) -> JointWrench {
    let (on_parent, on_child) = if reversed {
        (reaction.outboard, reaction.inboard)
    } else {
        (reaction.inboard, reaction.outboard)
    };
    let local = |f: SpatialForce, rotation: DQuat| {
        let inv = rotation.inverse();
        SpatialForce::new(inv * f.torque, inv * f.force)
    };
    let parent = -local(on_parent, parent_rotation);
    let child = -local(on_child, child_rotation);
    JointWrench {
        body1_force: parent.force,
        body1_torque: parent.torque,
        body2_force: child.force,
        body2_torque: child.torque,
    }
}

/// Rotation of `q_rel` away from `rel0` about `axis`, in `(-π, π]`.
///
/// `q_rel` is the second body's orientation relative to the first and
/// `axis` is expressed in the first body's frame.
pub fn twist_angle(q_rel: DQuat, rel0: DQuat, axis: DVec3) -> f64 {
    let mut d = q_rel * rel0.inverse();
    if d.w < 0.0 {
        d = -d;
    }
    2.0 * d.xyz().dot(axis).atan2(d.w)
}
