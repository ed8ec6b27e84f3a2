use crate::coupling::{CouplingId, GearCoupling};
use crate::engine::MultibodyEngine;
use crate::tree::{Mobilizer, MobilizerId};
use glam::DVec3;
use mechspace_common::{LinkId, Transform};
use mechspace_joint::{
    Assembly, AssemblySpec, BackendAdapter, CouplingGeometry, GearSpec, JointError, JointKind,
    LoadError, Reaction, SpringDamper, unsupported,
};
use mechspace_kernel::World;

/// Joint adapter for [`MultibodyEngine`].
///
/// Hinges become mobilizers in the tree; gearboxes become rate couplings
/// between the mobilizers that already carry their links. Point anchors are
/// not expressible in joint coordinates and report `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultibodyAdapter {
    Mobilizer(MobilizerId),
    Gear(CouplingId),
}

fn pose_of(world: &World, link: Option<LinkId>) -> Transform {
    link.and_then(|id| world.link_pose(id))
        .unwrap_or(Transform::IDENTITY)
}

fn rejected(spec: &AssemblySpec<'_>, reason: impl ToString) -> LoadError {
    LoadError::Backend {
        joint: spec.name.to_owned(),
        backend: "multibody",
        reason: reason.to_string(),
    }
}

impl MultibodyAdapter {
    fn mobilizer<'a>(
        physics: &'a MultibodyEngine,
        id: MobilizerId,
        op: &'static str,
    ) -> Result<&'a Mobilizer, JointError> {
        physics.mobilizer(id).ok_or(JointError::Detached { op })
    }

    fn gear<'a>(
        physics: &'a MultibodyEngine,
        id: CouplingId,
        op: &'static str,
    ) -> Result<&'a GearCoupling, JointError> {
        physics.coupling(id).ok_or(JointError::Detached { op })
    }

    fn assemble_hinge(
        physics: &mut MultibodyEngine,
        world: &World,
        spec: &AssemblySpec<'_>,
    ) -> Result<(Self, Assembly), LoadError> {
        let placement = physics
            .tree()
            .place(spec.parent, spec.child, spec.loop_break)
            .map_err(|e| rejected(spec, e))?;
        let poses = [
            pose_of(world, placement.inboard),
            pose_of(world, Some(placement.outboard)),
        ];
        let mut mobilizer = Mobilizer::new(spec.name, placement, spec.joint_frame, spec.axes[0], poses);
        mobilizer.limit = spec.limits.first().copied().unwrap_or_default();
        let id = physics.add_mobilizer(mobilizer);
        Ok((
            Self::Mobilizer(id),
            Assembly {
                reversed: placement.reversed,
            },
        ))
    }

    fn assemble_gear(
        physics: &mut MultibodyEngine,
        world: &World,
        spec: &AssemblySpec<'_>,
    ) -> Result<(Self, Assembly), LoadError> {
        let mut mobilizers = [None; 2];
        for (slot, link) in mobilizers.iter_mut().zip([spec.parent, spec.child]) {
            let Some(link) = link else {
                continue;
            };
            let Some(id) = physics.tree().inboard_of(link) else {
                return Err(rejected(
                    spec,
                    format!("link {link:?} has no mobilizer to couple; assemble its hinge first"),
                ));
            };
            *slot = Some(id);
        }
        let gear = spec.gear.unwrap_or(GearSpec {
            ratio: 1.0,
            reference: None,
        });
        let mut coupling = GearCoupling::new(spec.name, spec.parent, spec.child, mobilizers);
        coupling.derive(
            gear.ratio,
            gear.reference,
            pose_of(world, gear.reference),
            [spec.axes[0], spec.axes[1]],
            [
                pose_of(world, spec.parent).rotation,
                pose_of(world, spec.child).rotation,
            ],
        );
        let id = physics.add_coupling(coupling);
        Ok((Self::Gear(id), Assembly { reversed: false }))
    }
}

impl BackendAdapter for MultibodyAdapter {
    type Physics = MultibodyEngine;

    fn assemble(
        physics: &mut MultibodyEngine,
        world: &World,
        spec: &AssemblySpec<'_>,
    ) -> Result<(Self, Assembly), LoadError> {
        let gear_reference = spec.gear.and_then(|g| g.reference);
        for link in [spec.parent, spec.child, gear_reference].into_iter().flatten() {
            if world.link(link).is_none() {
                return Err(rejected(spec, format!("link {link:?} is not in the world")));
            }
        }
        physics.sync(world);
        match spec.kind {
            JointKind::Hinge => Self::assemble_hinge(physics, world, spec),
            JointKind::Gearbox => Self::assemble_gear(physics, world, spec),
        }
    }

    fn set_axis(
        &mut self,
        physics: &mut MultibodyEngine,
        world: &World,
        index: usize,
        axis: DVec3,
    ) -> Result<(), JointError> {
        const OP: &str = "set_axis";
        match *self {
            Self::Mobilizer(id) => {
                let m = physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?;
                let inboard = pose_of(world, m.inboard);
                let outboard = pose_of(world, Some(m.outboard));
                m.reseat_axis(inboard, outboard, axis);
            }
            Self::Gear(id) => {
                let gear = physics.coupling_mut(id).ok_or(JointError::Detached { op: OP })?;
                let frame = pose_of(world, gear.reference);
                gear.axes[index] = frame.inverse_rotate_vector(axis).normalize_or_zero();
            }
        }
        Ok(())
    }

    fn global_axis(
        &self,
        physics: &MultibodyEngine,
        world: &World,
        index: usize,
    ) -> Result<DVec3, JointError> {
        const OP: &str = "global_axis";
        match *self {
            Self::Mobilizer(id) => {
                let m = Self::mobilizer(physics, id, OP)?;
                Ok(m.world_axis(pose_of(world, m.inboard)))
            }
            Self::Gear(id) => {
                let gear = Self::gear(physics, id, OP)?;
                Ok(gear.world_axis(pose_of(world, gear.reference), index))
            }
        }
    }

    fn apply_effort(
        &mut self,
        physics: &mut MultibodyEngine,
        index: usize,
        effort: f64,
    ) -> Result<(), JointError> {
        const OP: &str = "apply_effort";
        match *self {
            Self::Mobilizer(id) => {
                physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?.effort = effort;
            }
            Self::Gear(id) => {
                physics.coupling_mut(id).ok_or(JointError::Detached { op: OP })?.effort[index] = effort;
            }
        }
        Ok(())
    }

    fn set_spring_damper(
        &mut self,
        physics: &mut MultibodyEngine,
        index: usize,
        params: SpringDamper,
    ) -> Result<(), JointError> {
        const OP: &str = "set_spring_damper";
        match *self {
            Self::Mobilizer(id) => {
                physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?.spring = params;
            }
            Self::Gear(id) => {
                physics.coupling_mut(id).ok_or(JointError::Detached { op: OP })?.springs[index] = params;
            }
        }
        Ok(())
    }

    fn set_friction(
        &mut self,
        physics: &mut MultibodyEngine,
        _index: usize,
        friction: f64,
    ) -> Result<(), JointError> {
        const OP: &str = "set_friction";
        match *self {
            Self::Mobilizer(id) => {
                physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?.friction = friction;
                Ok(())
            }
            Self::Gear(_) => Err(unsupported::<Self>(OP)),
        }
    }

    fn set_effort_limit(
        &mut self,
        physics: &mut MultibodyEngine,
        _index: usize,
        effort: f64,
    ) -> Result<(), JointError> {
        const OP: &str = "set_effort_limit";
        match *self {
            Self::Mobilizer(id) => {
                physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?.limit.effort = effort;
                Ok(())
            }
            Self::Gear(_) => Err(unsupported::<Self>(OP)),
        }
    }

    fn set_velocity(
        &mut self,
        physics: &mut MultibodyEngine,
        _world: &World,
        _index: usize,
        rate: f64,
    ) -> Result<(), JointError> {
        const OP: &str = "set_velocity";
        match *self {
            Self::Mobilizer(id) => {
                let m = physics.mobilizer_mut(id).ok_or(JointError::Detached { op: OP })?;
                m.u = m.sign * rate;
                Ok(())
            }
            // coupled rates are set through the mobilizers they join
            Self::Gear(_) => Err(unsupported::<Self>(OP)),
        }
    }

    fn reaction(&self, physics: &MultibodyEngine, world: &World) -> Result<Reaction, JointError> {
        let reaction = match *self {
            Self::Mobilizer(id) => physics.mobilizer_reaction(id, world.gravity()),
            Self::Gear(id) => physics.coupling_reaction(id, world.step_size()),
        };
        reaction.ok_or(JointError::Detached { op: "reaction" })
    }

    fn angle(&self, physics: &MultibodyEngine, world: &World, index: usize) -> Result<f64, JointError> {
        const OP: &str = "angle";
        match *self {
            Self::Mobilizer(id) => Ok(Self::mobilizer(physics, id, OP)?.angle()),
            Self::Gear(id) => {
                let gear = Self::gear(physics, id, OP)?;
                let link = if index == 0 { gear.parent } else { gear.child };
                Ok(gear.angle(
                    pose_of(world, gear.reference),
                    pose_of(world, link).rotation,
                    index,
                ))
            }
        }
    }

    fn velocity(
        &self,
        physics: &MultibodyEngine,
        world: &World,
        index: usize,
    ) -> Result<f64, JointError> {
        const OP: &str = "velocity";
        match *self {
            Self::Mobilizer(id) => Ok(Self::mobilizer(physics, id, OP)?.rate()),
            Self::Gear(id) => {
                let gear = Self::gear(physics, id, OP)?;
                let link = if index == 0 { gear.parent } else { gear.child };
                let axis = gear.world_axis(pose_of(world, gear.reference), index);
                Ok(axis.dot(physics.angular_velocity(link) - physics.angular_velocity(gear.reference)))
            }
        }
    }

    fn couple_axes(
        &mut self,
        physics: &mut MultibodyEngine,
        world: &World,
        gear: GearSpec,
    ) -> Result<(), JointError> {
        const OP: &str = "couple_axes";
        let Self::Gear(id) = *self else {
            return Err(unsupported::<Self>(OP));
        };
        let coupling = physics.coupling_mut(id).ok_or(JointError::Detached { op: OP })?;
        let old_frame = pose_of(world, coupling.reference);
        let axes = [coupling.world_axis(old_frame, 0), coupling.world_axis(old_frame, 1)];
        let frame = pose_of(world, gear.reference);
        let rotations = [
            pose_of(world, coupling.parent).rotation,
            pose_of(world, coupling.child).rotation,
        ];
        coupling.derive(gear.ratio, gear.reference, frame, axes, rotations);
        tracing::debug!(?frame, ratio = gear.ratio, "gear coupling re-derived");
        Ok(())
    }

    fn coupling(&self, physics: &MultibodyEngine) -> Result<CouplingGeometry, JointError> {
        let Self::Gear(id) = *self else {
            return Err(unsupported::<Self>("coupling"));
        };
        let gear = Self::gear(physics, id, "coupling")?;
        Ok(CouplingGeometry {
            ratio: gear.ratio,
            reference: gear.reference,
            frame: gear.frame,
            axes: gear.axes,
        })
    }

    fn detach(&mut self, physics: &mut MultibodyEngine) {
        match *self {
            // topology is fixed once assembled; the mobilizer stays and
            // turns freely
            Self::Mobilizer(id) => {
                if let Some(m) = physics.mobilizer_mut(id) {
                    m.released = true;
                    m.effort = 0.0;
                    m.spring = SpringDamper::default();
                    m.friction = 0.0;
                }
            }
            Self::Gear(id) => {
                physics.remove_coupling(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DQuat;
    use mechspace_joint::{AxisDescription, GearboxJoint, HingeJoint, JointDescription, Simulation};
    use mechspace_kernel::{Link, WorldConfig};
    use std::f64::consts::FRAC_PI_2;

    type Sim = Simulation<MultibodyEngine>;

    /// Hinge about X; `pose` is the joint frame relative to the child.
    fn hinge_desc(name: &str, parent: Option<&str>, child: &str, pose: Transform) -> JointDescription {
        JointDescription::hinge(name, "pendulum", parent, Some(child), AxisDescription::new(DVec3::X))
            .with_pose(pose)
    }

    /// Base welded at z = 1, bob of mass 2 hanging at the origin.
    fn pendulum_sim() -> Sim {
        let mut world = World::new();
        let m = world.spawn_model("pendulum", Transform::IDENTITY);
        world
            .spawn_link(Link::new("base", m, Transform::from_position(DVec3::Z), 1.0).kinematic())
            .unwrap();
        world
            .spawn_link(Link::new("bob", m, Transform::IDENTITY, 2.0).with_inertia(DVec3::ZERO))
            .unwrap();
        Simulation::new(world, MultibodyEngine::default())
    }

    fn link(sim: &Sim, model: &str, name: &str) -> LinkId {
        let model = sim.world().model_by_name(model).unwrap();
        sim.world().link_by_name(model, name).unwrap()
    }

    fn add_weight(sim: &mut Sim, inertia: DVec3) {
        let m = sim.world().model_by_name("pendulum").unwrap();
        sim.world_mut()
            .spawn_link(Link::new("weight", m, Transform::from_position(-DVec3::Z), 1.0).with_inertia(inertia))
            .unwrap();
    }

    /// Joint frame one metre above the bob.
    fn pivot() -> Transform {
        Transform::from_position(DVec3::Z)
    }

    fn hinge(sim: &mut Sim, desc: JointDescription) -> HingeJoint<MultibodyAdapter> {
        let mut joint = HingeJoint::new();
        joint.load(sim.world(), desc).unwrap();
        joint.init(sim).unwrap();
        joint
    }

    #[test]
    fn hanging_bob_reports_its_weight() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        assert!(!joint.reversed());
        for _ in 0..5 {
            joint.update(sim.world());
            sim.step();
        }
        let wrench = joint.force_torque(&sim);
        // the bob pulls down on the joint with its weight
        assert_relative_eq!(wrench.body2_force.z, -19.62, epsilon = 1e-9);
        assert_relative_eq!(wrench.body1_force.z, 19.62, epsilon = 1e-9);
        assert_relative_eq!(joint.angle(&sim, 0), 0.0);
    }

    #[test]
    fn mobilized_child_reverses_the_wrench() {
        let mut sim = pendulum_sim();
        add_weight(&mut sim, DVec3::ZERO);
        let _pivot = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        // bob already hangs from base, so the weight becomes the outboard body
        let mut lower = hinge(&mut sim, hinge_desc("lower", Some("weight"), "bob", Transform::IDENTITY));
        assert!(lower.reversed());
        lower.update(sim.world());
        sim.step();
        let wrench = lower.force_torque(&sim);
        // the parent (1 kg weight) hangs from the joint
        assert_relative_eq!(wrench.body1_force.z, -9.81, epsilon = 1e-9);
        assert_relative_eq!(wrench.body2_force.z, 9.81, epsilon = 1e-9);
    }

    #[test]
    fn reversed_angle_follows_the_child() {
        let mut sim = pendulum_sim();
        add_weight(&mut sim, DVec3::splat(1.0 / 6.0));
        let _pivot = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        let mut lower = hinge(&mut sim, hinge_desc("lower", Some("weight"), "bob", Transform::IDENTITY));
        lower.set_force(&mut sim, 0, 5.0);
        sim.step();
        // positive effort turns the child positively relative to the parent
        assert!(lower.velocity(&sim, 0) > 0.0);
        assert!(lower.angle(&sim, 0) > 0.0);
    }

    #[test]
    fn closing_a_loop_fails_to_load() {
        let mut sim = pendulum_sim();
        let _pivot = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        let mut twin = HingeJoint::<MultibodyAdapter>::new();
        twin.load(sim.world(), hinge_desc("twin", Some("base"), "bob", pivot()))
            .unwrap();
        let err = twin.init(&mut sim).unwrap_err();
        assert!(matches!(err, LoadError::Backend { backend: "multibody", .. }));
    }

    #[test]
    fn world_parent_hangs_from_ground() {
        let mut sim = pendulum_sim();
        let joint = hinge(&mut sim, hinge_desc("pivot", None, "bob", pivot()));
        assert!(!joint.reversed());
        assert!(joint.global_axis(&sim, 0).abs_diff_eq(DVec3::X, 1e-12));
    }

    #[test]
    fn effort_swings_the_bob() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        for _ in 0..20 {
            joint.set_force(&mut sim, 0, 4.0);
            sim.step();
        }
        assert!(joint.velocity(&sim, 0) > 0.0);
        // +X rotation carries a hanging bob toward +Y
        let bob = link(&sim, "pendulum", "bob");
        assert!(sim.world().link_pose(bob).unwrap().position.y > 0.0);
    }

    #[test]
    fn anchors_are_unsupported() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        joint.set_anchor(&mut sim, 0, DVec3::ONE);
        assert_eq!(joint.anchor(&sim, 0), DVec3::ZERO);
        let notices = joint.drain_notices();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| matches!(
            n.error,
            JointError::Unsupported { backend: "multibody", .. }
        )));
    }

    #[test]
    fn set_velocity_sets_the_joint_rate() {
        let mut sim = pendulum_sim();
        add_weight(&mut sim, DVec3::splat(1.0 / 6.0));
        let _pivot = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        let mut lower = hinge(&mut sim, hinge_desc("lower", Some("weight"), "bob", Transform::IDENTITY));
        assert!(lower.reversed());
        lower.set_velocity(&mut sim, 0, 0.75);
        assert_relative_eq!(lower.velocity(&sim, 0), 0.75, epsilon = 1e-12);
        assert!(lower.notices().is_empty());
    }

    #[test]
    fn max_force_bounds_the_mobilizer() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        joint.set_max_force(&mut sim, 0, 1.5);
        let Some(&MultibodyAdapter::Mobilizer(id)) = joint.adapter() else {
            panic!("hinge should own a mobilizer");
        };
        assert_eq!(sim.physics().mobilizer(id).unwrap().limit.effort, 1.5);
        joint.set_force(&mut sim, 0, 4.0);
        assert_eq!(joint.force(0), 1.5);
        assert_eq!(sim.physics().mobilizer(id).unwrap().effort, 1.5);
    }

    #[test]
    fn link_wrenches_are_unsupported() {
        let mut sim = pendulum_sim();
        let joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        assert_eq!(joint.link_force(&sim, 0), DVec3::ZERO);
        assert_eq!(joint.link_torque(&sim, 1), DVec3::ZERO);
        assert_eq!(joint.notices().len(), 2);
        assert!(joint.notices().iter().all(|n| matches!(
            n.error,
            JointError::Unsupported { backend: "multibody", .. }
        )));
    }

    #[test]
    fn detach_keeps_the_mobilizer() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        joint.set_stiffness(&mut sim, 0, 50.0);
        let Some(&MultibodyAdapter::Mobilizer(id)) = joint.adapter() else {
            panic!("hinge should own a mobilizer");
        };
        joint.detach(&mut sim);
        assert_eq!(sim.physics().tree().len(), 1);
        let m = sim.physics().mobilizer(id).unwrap();
        assert!(m.released);
        assert_eq!(m.spring, SpringDamper::default());
        assert_eq!(joint.angle(&sim, 0), 0.0);
    }

    #[test]
    fn set_axis_rezeroes_the_mobilizer() {
        let mut sim = pendulum_sim();
        let mut joint = hinge(&mut sim, hinge_desc("pivot", Some("base"), "bob", pivot()));
        joint.set_axis(&mut sim, 0, DVec3::Y);
        assert!(joint.global_axis(&sim, 0).abs_diff_eq(DVec3::Y, 1e-12));
        joint.set_force(&mut sim, 0, 4.0);
        sim.step();
        // +Y rotation carries a hanging bob toward -X
        let bob = link(&sim, "pendulum", "bob");
        assert!(sim.world().link_pose(bob).unwrap().position.x < 0.0);
    }

    /// Input and output shafts hinged on a welded housing; the carrier in
    /// the second model is rolled 90° about X.
    fn gear_sim() -> (Sim, [HingeJoint<MultibodyAdapter>; 2]) {
        let mut world = World::with_config(WorldConfig {
            gravity: DVec3::ZERO,
            ..Default::default()
        });
        let gears = world.spawn_model("gears", Transform::IDENTITY);
        let stage = world.spawn_model("stage", Transform::from_rotation(DQuat::from_rotation_x(FRAC_PI_2)));
        world
            .spawn_link(Link::new("housing", gears, Transform::IDENTITY, 5.0).kinematic())
            .unwrap();
        world
            .spawn_link(Link::new("input", gears, Transform::IDENTITY, 1.0))
            .unwrap();
        world
            .spawn_link(Link::new("output", stage, Transform::from_position(DVec3::X), 1.0))
            .unwrap();
        world
            .spawn_link(
                Link::new("carrier", stage, Transform::from_rotation(DQuat::from_rotation_x(FRAC_PI_2)), 1.0)
                    .kinematic(),
            )
            .unwrap();
        let mut sim = Simulation::new(world, MultibodyEngine::default());
        let shaft = |name: &str, child: &str| {
            JointDescription::hinge(name, "gears", Some("housing"), Some(child), AxisDescription::new(DVec3::Z))
        };
        let input = hinge(&mut sim, shaft("input_shaft", "input"));
        let output = hinge(&mut sim, shaft("output_shaft", "stage::output"));
        (sim, [input, output])
    }

    fn gearbox_desc(ratio: f64) -> JointDescription {
        JointDescription::gearbox(
            "reducer",
            "gears",
            "input",
            "stage::output",
            [AxisDescription::new(DVec3::Z), AxisDescription::new(DVec3::Z)],
            ratio,
            Some("housing"),
        )
    }

    fn gearbox(sim: &mut Sim, desc: JointDescription) -> GearboxJoint<MultibodyAdapter> {
        let mut joint = GearboxJoint::new();
        joint.load(sim.world(), desc).unwrap();
        joint.init(sim).unwrap();
        joint
    }

    #[test]
    fn gear_couples_shaft_rates() {
        let (mut sim, [mut input, output]) = gear_sim();
        let gear = gearbox(&mut sim, gearbox_desc(2.0));
        for _ in 0..10 {
            input.set_force(&mut sim, 0, 1.0);
            sim.step();
        }
        let w_in = input.velocity(&sim, 0);
        assert!(w_in > 0.0);
        assert_relative_eq!(output.velocity(&sim, 0), 2.0 * w_in, epsilon = 1e-9);
        assert_relative_eq!(gear.velocity(&sim, 1), 2.0 * gear.velocity(&sim, 0), epsilon = 1e-9);
        // the driven shaft resists through the coupling
        let wrench = gear.force_torque(&sim);
        assert!(wrench.body1_torque.z.abs() > 0.0);
    }

    #[test]
    fn gear_needs_mobilized_links() {
        let mut world = World::new();
        let gears = world.spawn_model("gears", Transform::IDENTITY);
        let stage = world.spawn_model("stage", Transform::IDENTITY);
        world.spawn_link(Link::new("housing", gears, Transform::IDENTITY, 1.0)).unwrap();
        world.spawn_link(Link::new("input", gears, Transform::IDENTITY, 1.0)).unwrap();
        world.spawn_link(Link::new("output", stage, Transform::IDENTITY, 1.0)).unwrap();
        let mut sim = Simulation::new(world, MultibodyEngine::default());
        let mut joint = GearboxJoint::<MultibodyAdapter>::new();
        joint.load(sim.world(), gearbox_desc(1.0)).unwrap();
        assert!(matches!(joint.init(&mut sim), Err(LoadError::Backend { .. })));
    }

    #[test]
    fn reference_change_rederives_the_coupling() {
        let (mut sim, _shafts) = gear_sim();
        let mut gear = gearbox(&mut sim, gearbox_desc(1.0));
        let before = gear.coupling(&sim).unwrap();
        assert!(before.axes[0].abs_diff_eq(DVec3::Z, 1e-12));

        let carrier = link(&sim, "stage", "carrier");
        gear.set_reference_body(&mut sim, Some(carrier));
        gear.set_gear_ratio(&mut sim, 2.0);
        let after = gear.coupling(&sim).unwrap();
        assert_eq!(after.reference, Some(carrier));
        assert_eq!(after.ratio, 2.0);
        // world Z seen from a frame rolled 90° about X
        assert!(after.axes[0].abs_diff_eq(DVec3::Y, 1e-12));
        assert!(gear.global_axis(&sim, 0).abs_diff_eq(DVec3::Z, 1e-12));
    }

    #[test]
    fn gearbox_anchor_is_unsupported() {
        let (mut sim, _shafts) = gear_sim();
        let gear = gearbox(&mut sim, gearbox_desc(1.0));
        assert_eq!(gear.anchor(&sim, 1), DVec3::ZERO);
        assert!(matches!(
            gear.notices()[0].error,
            JointError::Unsupported { op: "anchor", .. }
        ));
    }
}
