use crate::constraint::{GearGeometry, HingeGeometry, NativeJoint, NativeJointId, NativeKind};
use crate::engine::MaximalEngine;
use glam::DVec3;
use mechspace_common::{LinkId, Transform};
use mechspace_joint::{
    Assembly, AssemblySpec, BackendAdapter, CouplingGeometry, GearSpec, JointError, JointKind,
    LoadError, Reaction, SpringDamper, unsupported,
};
use mechspace_kernel::World;

/// Joint adapter for [`MaximalEngine`]: holds the handle of one native
/// constraint.
///
/// Body1 is always the parent and body2 the child, so assemblies are never
/// reversed.
#[derive(Debug)]
pub struct MaximalAdapter {
    id: NativeJointId,
}

impl MaximalAdapter {
    pub fn id(&self) -> NativeJointId {
        self.id
    }

    fn native<'a>(
        &self,
        physics: &'a MaximalEngine,
        op: &'static str,
    ) -> Result<&'a NativeJoint, JointError> {
        physics.joint(self.id).ok_or(JointError::Detached { op })
    }

    fn native_mut<'a>(
        &self,
        physics: &'a mut MaximalEngine,
        op: &'static str,
    ) -> Result<&'a mut NativeJoint, JointError> {
        physics.joint_mut(self.id).ok_or(JointError::Detached { op })
    }
}

fn pose_of(world: &World, link: Option<LinkId>) -> Transform {
    link.and_then(|id| world.link_pose(id))
        .unwrap_or(Transform::IDENTITY)
}

impl BackendAdapter for MaximalAdapter {
    type Physics = MaximalEngine;

    fn assemble(
        physics: &mut MaximalEngine,
        world: &World,
        spec: &AssemblySpec<'_>,
    ) -> Result<(Self, Assembly), LoadError> {
        let gear_reference = spec.gear.and_then(|g| g.reference);
        for link in [spec.parent, spec.child, gear_reference].into_iter().flatten() {
            if world.link(link).is_none() {
                return Err(LoadError::Backend {
                    joint: spec.name.to_owned(),
                    backend: "maximal",
                    reason: format!("link {link:?} is not in the world"),
                });
            }
        }
        physics.sync(world);
        let x1 = pose_of(world, spec.parent);
        let x2 = pose_of(world, spec.child);

        let kind = match spec.kind {
            JointKind::Hinge => {
                let anchor = spec.joint_frame.position;
                let axis = spec.axes[0];
                NativeKind::Hinge(HingeGeometry {
                    anchor1: x1.inverse().transform_point(anchor),
                    anchor2: x2.inverse().transform_point(anchor),
                    axis1: x1.inverse_rotate_vector(axis),
                    axis2: x2.inverse_rotate_vector(axis),
                    rel0: x1.rotation.inverse() * x2.rotation,
                })
            }
            JointKind::Gearbox => {
                let gear = spec.gear.unwrap_or(GearSpec {
                    ratio: 1.0,
                    reference: None,
                });
                NativeKind::Gearbox(GearGeometry::derive(
                    gear.ratio,
                    gear.reference,
                    pose_of(world, gear.reference),
                    [spec.axes[0], spec.axes[1]],
                    [x1.rotation, x2.rotation],
                ))
            }
        };
        let mut native = NativeJoint::new(spec.name, spec.parent, spec.child, kind);
        for (slot, limit) in native.limits.iter_mut().zip(&spec.limits) {
            *slot = *limit;
        }
        let id = physics.add_joint(native);
        Ok((Self { id }, Assembly { reversed: false }))
    }

    fn set_axis(
        &mut self,
        physics: &mut MaximalEngine,
        world: &World,
        index: usize,
        axis: DVec3,
    ) -> Result<(), JointError> {
        let native = self.native_mut(physics, "set_axis")?;
        let x1 = pose_of(world, native.body1);
        let x2 = pose_of(world, native.body2);
        match &mut native.kind {
            NativeKind::Hinge(h) => {
                h.axis1 = x1.inverse_rotate_vector(axis);
                h.axis2 = x2.inverse_rotate_vector(axis);
                h.rel0 = x1.rotation.inverse() * x2.rotation;
            }
            NativeKind::Gearbox(g) => {
                let frame = pose_of(world, g.reference);
                g.axes[index] = frame.inverse_rotate_vector(axis);
            }
        }
        Ok(())
    }

    fn global_axis(
        &self,
        physics: &MaximalEngine,
        _world: &World,
        index: usize,
    ) -> Result<DVec3, JointError> {
        let native = self.native(physics, "global_axis")?;
        Ok(native.world_axis(physics.bodies(), index))
    }

    fn apply_effort(
        &mut self,
        physics: &mut MaximalEngine,
        index: usize,
        effort: f64,
    ) -> Result<(), JointError> {
        self.native_mut(physics, "apply_effort")?.effort[index] = effort;
        Ok(())
    }

    fn set_spring_damper(
        &mut self,
        physics: &mut MaximalEngine,
        index: usize,
        params: SpringDamper,
    ) -> Result<(), JointError> {
        self.native_mut(physics, "set_spring_damper")?.springs[index] = params;
        Ok(())
    }

    fn set_friction(
        &mut self,
        physics: &mut MaximalEngine,
        index: usize,
        friction: f64,
    ) -> Result<(), JointError> {
        self.native_mut(physics, "set_friction")?.friction[index] = friction;
        Ok(())
    }

    fn set_effort_limit(
        &mut self,
        physics: &mut MaximalEngine,
        index: usize,
        effort: f64,
    ) -> Result<(), JointError> {
        self.native_mut(physics, "set_effort_limit")?.limits[index].effort = effort;
        Ok(())
    }

    /// Spins the driven body about the axis until the relative rate is
    /// `rate`. A static driven body leaves the rate unchanged.
    fn set_velocity(
        &mut self,
        physics: &mut MaximalEngine,
        world: &World,
        index: usize,
        rate: f64,
    ) -> Result<(), JointError> {
        const OP: &str = "set_velocity";
        physics.sync(world);
        let native = self.native(physics, OP)?;
        let axis = native.world_axis(physics.bodies(), index);
        let delta = rate - native.velocity(physics.bodies(), index);
        let (driven, _) = native.axis_bodies(index);
        if let Some(body) = driven.and_then(|id| physics.bodies_mut().get_mut(id)) {
            if body.is_dynamic() {
                body.angvel += axis * delta;
            }
        }
        Ok(())
    }

    fn link_force(
        &self,
        physics: &MaximalEngine,
        _world: &World,
        index: usize,
    ) -> Result<DVec3, JointError> {
        let feedback = self.native(physics, "link_force")?.feedback;
        Ok(if index == 0 { feedback.outboard.force } else { feedback.inboard.force })
    }

    fn link_torque(
        &self,
        physics: &MaximalEngine,
        _world: &World,
        index: usize,
    ) -> Result<DVec3, JointError> {
        let feedback = self.native(physics, "link_torque")?.feedback;
        Ok(if index == 0 { feedback.outboard.torque } else { feedback.inboard.torque })
    }

    fn reaction(&self, physics: &MaximalEngine, _world: &World) -> Result<Reaction, JointError> {
        Ok(self.native(physics, "reaction")?.feedback)
    }

    fn angle(&self, physics: &MaximalEngine, _world: &World, index: usize) -> Result<f64, JointError> {
        Ok(self.native(physics, "angle")?.angle(physics.bodies(), index))
    }

    fn velocity(
        &self,
        physics: &MaximalEngine,
        _world: &World,
        index: usize,
    ) -> Result<f64, JointError> {
        Ok(self.native(physics, "velocity")?.velocity(physics.bodies(), index))
    }

    fn couple_axes(
        &mut self,
        physics: &mut MaximalEngine,
        world: &World,
        gear: GearSpec,
    ) -> Result<(), JointError> {
        const OP: &str = "couple_axes";
        physics.sync(world);
        let native = self.native(physics, OP)?;
        let NativeKind::Gearbox(_) = native.kind else {
            return Err(unsupported::<Self>(OP));
        };
        let axes = [
            native.world_axis(physics.bodies(), 0),
            native.world_axis(physics.bodies(), 1),
        ];
        let rotations = [
            pose_of(world, native.body1).rotation,
            pose_of(world, native.body2).rotation,
        ];
        let geometry = GearGeometry::derive(
            gear.ratio,
            gear.reference,
            pose_of(world, gear.reference),
            axes,
            rotations,
        );
        self.native_mut(physics, OP)?.kind = NativeKind::Gearbox(geometry);
        tracing::debug!(frame = ?geometry.frame, ratio = gear.ratio, "gear geometry re-derived");
        Ok(())
    }

    fn coupling(&self, physics: &MaximalEngine) -> Result<CouplingGeometry, JointError> {
        match self.native(physics, "coupling")?.kind {
            NativeKind::Gearbox(g) => Ok(CouplingGeometry {
                ratio: g.ratio,
                reference: g.reference,
                frame: g.frame,
                axes: g.axes,
            }),
            NativeKind::Hinge(_) => Err(unsupported::<Self>("coupling")),
        }
    }

    fn set_anchor(
        &mut self,
        physics: &mut MaximalEngine,
        world: &World,
        _index: usize,
        anchor: DVec3,
    ) -> Result<(), JointError> {
        let native = self.native_mut(physics, "set_anchor")?;
        let x1 = pose_of(world, native.body1);
        let x2 = pose_of(world, native.body2);
        match &mut native.kind {
            NativeKind::Hinge(h) => {
                h.anchor1 = x1.inverse().transform_point(anchor);
                h.anchor2 = x2.inverse().transform_point(anchor);
                Ok(())
            }
            NativeKind::Gearbox(_) => Err(unsupported::<Self>("set_anchor")),
        }
    }

    fn anchor(&self, physics: &MaximalEngine, world: &World, _index: usize) -> Result<DVec3, JointError> {
        let native = self.native(physics, "anchor")?;
        match &native.kind {
            NativeKind::Hinge(h) => Ok(pose_of(world, native.body1).transform_point(h.anchor1)),
            NativeKind::Gearbox(_) => Err(unsupported::<Self>("anchor")),
        }
    }

    fn detach(&mut self, physics: &mut MaximalEngine) {
        physics.remove_joint(self.id);
    }
}
