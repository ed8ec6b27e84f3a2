use crate::adapter::{BackendAdapter, GearSpec, Simulation};
use crate::core::{JointCore, JointState};
use crate::description::{JointDescription, JointKind};
use crate::error::{JointError, JointNotice, LoadError};
use crate::frame;
use glam::{DQuat, DVec3};
use mechspace_common::{JointWrench, LinkId, ModelId, Transform};
use mechspace_kernel::World;

/// Axis parameters reachable through [`Joint::param`] and
/// [`Joint::set_param`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisParam {
    MaxForce,
    Velocity,
    Stiffness,
    Damping,
    SpringReference,
}

fn check_link_index(op: &'static str, index: usize) -> Result<(), JointError> {
    if index < 2 {
        Ok(())
    } else {
        Err(JointError::Index {
            op,
            index,
            count: 2,
        })
    }
}

/// A joint bound to one physics back-end.
///
/// Every operation here is written once against [`BackendAdapter`]; only
/// the adapter differs between back-ends. Per-call failures are logged,
/// recorded as notices and answered with a neutral default.
#[derive(Debug)]
pub struct Joint<A: BackendAdapter> {
    core: JointCore,
    adapter: Option<A>,
}

impl<A: BackendAdapter> Joint<A> {
    pub fn new(kind: JointKind) -> Self {
        Self {
            core: JointCore::new(kind),
            adapter: None,
        }
    }

    pub fn core(&self) -> &JointCore {
        &self.core
    }

    pub fn adapter(&self) -> Option<&A> {
        self.adapter.as_ref()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn kind(&self) -> JointKind {
        self.core.kind()
    }

    pub fn state(&self) -> JointState {
        self.core.state()
    }

    pub fn angle_count(&self) -> usize {
        self.core.angle_count()
    }

    pub fn description(&self) -> Option<&JointDescription> {
        self.core.description()
    }

    pub fn model(&self) -> Option<ModelId> {
        self.core.model
    }

    /// Parent link, `None` for the world frame or once detached.
    pub fn parent(&self) -> Option<LinkId> {
        self.core.parent
    }

    /// Child link, `None` for the world frame or once detached.
    pub fn child(&self) -> Option<LinkId> {
        self.core.child
    }

    /// Attachment by index: 0 is the child, 1 the parent.
    pub fn link(&self, index: usize) -> Option<LinkId> {
        match index {
            0 => self.core.child,
            1 => self.core.parent,
            _ => None,
        }
    }

    pub fn are_connected(&self, a: LinkId, b: LinkId) -> bool {
        let (p, c) = (self.core.parent, self.core.child);
        (p == Some(a) && c == Some(b)) || (p == Some(b) && c == Some(a))
    }

    /// Whether the back-end's inboard body is this joint's child.
    pub fn reversed(&self) -> bool {
        self.core.reversed
    }

    pub fn child_to_joint(&self) -> Transform {
        self.core.child_to_joint()
    }

    pub fn parent_to_joint(&self) -> Transform {
        self.core.parent_to_joint()
    }

    pub fn notices(&self) -> Vec<JointNotice> {
        self.core.notices()
    }

    pub fn drain_notices(&mut self) -> Vec<JointNotice> {
        self.core.drain_notices()
    }

    pub fn load(&mut self, world: &World, description: JointDescription) -> Result<(), LoadError> {
        self.core.load(world, description)
    }

    /// Assemble the native constraint from the links' current poses.
    pub fn init(&mut self, sim: &mut Simulation<A::Physics>) -> Result<(), LoadError> {
        self.init_with(sim, None)
    }

    pub(crate) fn init_with(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        gear: Option<GearSpec>,
    ) -> Result<(), LoadError> {
        if self.core.state() != JointState::Loaded {
            return Err(LoadError::State {
                joint: self.core.name().to_owned(),
                op: "init",
                state: self.core.state(),
            });
        }
        let (world, physics) = sim.split_mut();
        let (mut adapter, assembly) = {
            let spec = self.core.assembly_spec(world, gear)?;
            A::assemble(physics, world, &spec)?
        };
        self.core.reversed = assembly.reversed;

        let frictions: Vec<f64> = self
            .core
            .description()
            .map(|d| d.axes.iter().map(|a| a.friction).collect())
            .unwrap_or_default();
        for (index, params) in self.core.springs.clone().into_iter().enumerate() {
            if params != Default::default() {
                let result = adapter.set_spring_damper(physics, index, params);
                self.core.soft(result, ());
            }
        }
        for (index, friction) in frictions.into_iter().enumerate() {
            if friction > 0.0 {
                let result = adapter.set_friction(physics, index, friction);
                self.core.soft(result, ());
            }
        }
        self.adapter = Some(adapter);
        self.core.set_state(JointState::Initialized);
        tracing::info!(
            joint = %self.core.name(),
            reversed = self.core.reversed,
            "joint assembled"
        );
        Ok(())
    }

    /// Per-step bookkeeping; the first update makes the joint active.
    pub fn update(&mut self, world: &World) {
        if self.core.state() == JointState::Initialized {
            self.core.set_state(JointState::Active);
        }
        if self.core.state() != JointState::Active {
            return;
        }
        for link in [self.core.parent, self.core.child].into_iter().flatten() {
            if world.link(link).is_none() {
                self.core.notify(JointError::StaleLink { op: "update" });
            }
        }
    }

    /// Clear accumulated actuation.
    pub fn reset(&mut self) {
        self.core.forces.reset();
    }

    /// Remove the native constraint. Idempotent.
    pub fn detach(&mut self, sim: &mut Simulation<A::Physics>) {
        if self.core.state() == JointState::Detached {
            return;
        }
        if let Some(mut adapter) = self.adapter.take() {
            adapter.detach(sim.physics_mut());
        }
        self.core.detach();
    }

    pub(crate) fn call_mut<T>(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        op: &'static str,
        f: impl FnOnce(&mut A, &mut World, &mut A::Physics) -> Result<T, JointError>,
    ) -> Result<T, JointError> {
        self.core.check_live(op)?;
        let adapter = self
            .adapter
            .as_mut()
            .ok_or(JointError::NotInitialized { op })?;
        let (world, physics) = sim.split_mut();
        f(adapter, world, physics)
    }

    pub(crate) fn call<T>(
        &self,
        sim: &Simulation<A::Physics>,
        op: &'static str,
        f: impl FnOnce(&A, &World, &A::Physics) -> Result<T, JointError>,
    ) -> Result<T, JointError> {
        self.core.check_live(op)?;
        let adapter = self
            .adapter
            .as_ref()
            .ok_or(JointError::NotInitialized { op })?;
        f(adapter, sim.world(), sim.physics())
    }

    pub(crate) fn soft<T>(&self, result: Result<T, JointError>, default: T) -> T {
        self.core.soft(result, default)
    }

    /// Add an actuation contribution and forward the running total.
    pub fn set_force(&mut self, sim: &mut Simulation<A::Physics>, index: usize, value: f64) {
        let result = self.try_set_force(sim, index, value);
        self.core.soft(result, 0.0);
    }

    /// Returns the clamped total now applied to the axis.
    pub fn try_set_force(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        index: usize,
        value: f64,
    ) -> Result<f64, JointError> {
        const OP: &str = "set_force";
        self.core.check_index(OP, index)?;
        self.core.check_live(OP)?;
        let adapter = self
            .adapter
            .as_mut()
            .ok_or(JointError::NotInitialized { op: OP })?;
        let (world, physics) = sim.split_mut();
        let now = world.sim_time();
        let limit = self.core.limit(index);
        let total = self.core.forces.preview(now, index, value, &limit);
        adapter.apply_effort(physics, index, total)?;
        self.core.forces.commit(now, index, total);
        self.wake(world);
        Ok(total)
    }

    fn wake(&self, world: &mut World) {
        for link in [self.core.parent, self.core.child].into_iter().flatten() {
            world.set_enabled(link, true);
        }
    }

    /// Effort bound of an axis; negative when unlimited.
    pub fn max_force(&self, index: usize) -> f64 {
        let result = self
            .core
            .check_index("max_force", index)
            .map(|_| self.core.limit(index).effort);
        self.core.soft(result, 0.0)
    }

    /// Replace the effort bound of an axis. A negative value removes it.
    ///
    /// The bound is stored before init and pushed to the back-end once
    /// assembled. Totals already accumulated this step are not re-clamped.
    pub fn set_max_force(&mut self, sim: &mut Simulation<A::Physics>, index: usize, effort: f64) {
        const OP: &str = "set_max_force";
        let result = self.core.check_index(OP, index).and_then(|_| {
            if effort.is_nan() {
                return Err(JointError::InvalidArgument {
                    op: OP,
                    reason: "effort bound is NaN",
                });
            }
            if self.core.state() == JointState::Detached {
                return Err(JointError::Detached { op: OP });
            }
            self.core.set_effort_limit(index, effort);
            match self.adapter.as_mut() {
                Some(adapter) => adapter.set_effort_limit(sim.physics_mut(), index, effort),
                None => Ok(()),
            }
        });
        self.core.soft(result, ());
    }

    /// Drive an axis to `rate` immediately and wake its links.
    pub fn set_velocity(&mut self, sim: &mut Simulation<A::Physics>, index: usize, rate: f64) {
        const OP: &str = "set_velocity";
        let result = self.core.check_index(OP, index).and_then(|_| {
            if !rate.is_finite() {
                return Err(JointError::InvalidArgument {
                    op: OP,
                    reason: "rate is not finite",
                });
            }
            self.core.check_live(OP)?;
            self.wake(sim.world_mut());
            self.call_mut(sim, OP, |adapter, world, physics| {
                adapter.set_velocity(physics, world, index, rate)
            })
        });
        self.core.soft(result, ());
    }

    /// Force the joint exerts on an attachment (0 child, 1 parent), in
    /// world coordinates.
    pub fn link_force(&self, sim: &Simulation<A::Physics>, index: usize) -> DVec3 {
        let result = check_link_index("link_force", index).and_then(|_| {
            self.call(sim, "link_force", |adapter, world, physics| {
                adapter.link_force(physics, world, index)
            })
        });
        self.core.soft(result, DVec3::ZERO)
    }

    /// Torque the joint exerts on an attachment (0 child, 1 parent), in
    /// world coordinates.
    pub fn link_torque(&self, sim: &Simulation<A::Physics>, index: usize) -> DVec3 {
        let result = check_link_index("link_torque", index).and_then(|_| {
            self.call(sim, "link_torque", |adapter, world, physics| {
                adapter.link_torque(physics, world, index)
            })
        });
        self.core.soft(result, DVec3::ZERO)
    }

    /// Read an axis parameter by key.
    pub fn param(&self, sim: &Simulation<A::Physics>, index: usize, param: AxisParam) -> f64 {
        match param {
            AxisParam::MaxForce => self.max_force(index),
            AxisParam::Velocity => self.velocity(sim, index),
            AxisParam::Stiffness => self.stiffness(index),
            AxisParam::Damping => self.damping(index),
            AxisParam::SpringReference => self.spring_reference(index),
        }
    }

    /// Write an axis parameter by key.
    pub fn set_param(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        index: usize,
        param: AxisParam,
        value: f64,
    ) {
        match param {
            AxisParam::MaxForce => self.set_max_force(sim, index, value),
            AxisParam::Velocity => self.set_velocity(sim, index, value),
            AxisParam::Stiffness => self.set_stiffness(sim, index, value),
            AxisParam::Damping => self.set_damping(sim, index, value),
            AxisParam::SpringReference => {
                self.update_spring(sim, "set_param", index, |s| s.reference = value);
            }
        }
    }

    /// Accumulated actuation on an axis for the current time.
    pub fn force(&self, index: usize) -> f64 {
        let result = self
            .core
            .check_index("force", index)
            .map(|_| self.core.forces.get(index).unwrap_or_default());
        self.core.soft(result, 0.0)
    }

    pub fn stiffness(&self, index: usize) -> f64 {
        let result = self
            .core
            .check_index("stiffness", index)
            .map(|_| self.core.springs[index].stiffness);
        self.core.soft(result, 0.0)
    }

    pub fn damping(&self, index: usize) -> f64 {
        let result = self
            .core
            .check_index("damping", index)
            .map(|_| self.core.springs[index].damping);
        self.core.soft(result, 0.0)
    }

    pub fn spring_reference(&self, index: usize) -> f64 {
        let result = self
            .core
            .check_index("spring_reference", index)
            .map(|_| self.core.springs[index].reference);
        self.core.soft(result, 0.0)
    }

    pub fn set_stiffness(&mut self, sim: &mut Simulation<A::Physics>, index: usize, stiffness: f64) {
        self.update_spring(sim, "set_stiffness", index, |s| s.stiffness = stiffness);
    }

    pub fn set_damping(&mut self, sim: &mut Simulation<A::Physics>, index: usize, damping: f64) {
        self.update_spring(sim, "set_damping", index, |s| s.damping = damping);
    }

    pub fn set_stiffness_damping(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        index: usize,
        stiffness: f64,
        damping: f64,
        reference: f64,
    ) {
        self.update_spring(sim, "set_stiffness_damping", index, |s| {
            s.stiffness = stiffness;
            s.damping = damping;
            s.reference = reference;
        });
    }

    /// Parameters set before init are stored and pushed at assembly.
    fn update_spring(
        &mut self,
        sim: &mut Simulation<A::Physics>,
        op: &'static str,
        index: usize,
        edit: impl FnOnce(&mut crate::adapter::SpringDamper),
    ) {
        let result = self.core.check_index(op, index).and_then(|_| {
            if self.core.state() == JointState::Detached {
                return Err(JointError::Detached { op });
            }
            let mut params = self.core.springs[index];
            edit(&mut params);
            self.core.springs[index] = params;
            match self.adapter.as_mut() {
                Some(adapter) => adapter.set_spring_damper(sim.physics_mut(), index, params),
                None => Ok(()),
            }
        });
        self.core.soft(result, ());
    }

    /// Replace an axis direction given in the frame axes are stored in
    /// (see [`JointCore::axis_rotation`]).
    pub fn set_axis(&mut self, sim: &mut Simulation<A::Physics>, index: usize, axis: DVec3) {
        const OP: &str = "set_axis";
        let result = self.core.check_index(OP, index).and_then(|_| {
            let direction = axis.try_normalize().ok_or(JointError::InvalidArgument {
                op: OP,
                reason: "axis has no direction",
            })?;
            self.core.set_local_axis(index, direction);
            let world_axis = self.core.axis_rotation(sim.world()) * direction;
            self.call_mut(sim, OP, |adapter, world, physics| {
                adapter.set_axis(physics, world, index, world_axis)
            })
        });
        self.core.soft(result, ());
    }

    /// Axis direction in world coordinates.
    pub fn global_axis(&self, sim: &Simulation<A::Physics>, index: usize) -> DVec3 {
        let result = self.core.check_index("global_axis", index).and_then(|_| {
            self.call(sim, "global_axis", |adapter, world, physics| {
                adapter.global_axis(physics, world, index)
            })
        });
        self.core.soft(result, DVec3::ZERO)
    }

    /// Axis direction as stored in the description.
    pub fn local_axis(&self, index: usize) -> DVec3 {
        let result = self.core.check_index("local_axis", index).map(|_| {
            self.core.local_axis(index).unwrap_or(DVec3::ZERO)
        });
        self.core.soft(result, DVec3::ZERO)
    }

    pub fn set_anchor(&mut self, sim: &mut Simulation<A::Physics>, index: usize, anchor: DVec3) {
        let result = self.core.check_index("set_anchor", index).and_then(|_| {
            self.call_mut(sim, "set_anchor", |adapter, world, physics| {
                adapter.set_anchor(physics, world, index, anchor)
            })
        });
        self.core.soft(result, ());
    }

    /// Constraint point in world coordinates.
    pub fn anchor(&self, sim: &Simulation<A::Physics>, index: usize) -> DVec3 {
        let result = self.core.check_index("anchor", index).and_then(|_| {
            self.call(sim, "anchor", |adapter, world, physics| {
                adapter.anchor(physics, world, index)
            })
        });
        self.core.soft(result, DVec3::ZERO)
    }

    pub fn angle(&self, sim: &Simulation<A::Physics>, index: usize) -> f64 {
        let result = self.core.check_index("angle", index).and_then(|_| {
            self.call(sim, "angle", |adapter, world, physics| {
                adapter.angle(physics, world, index)
            })
        });
        self.core.soft(result, 0.0)
    }

    pub fn velocity(&self, sim: &Simulation<A::Physics>, index: usize) -> f64 {
        let result = self.core.check_index("velocity", index).and_then(|_| {
            self.call(sim, "velocity", |adapter, world, physics| {
                adapter.velocity(physics, world, index)
            })
        });
        self.core.soft(result, 0.0)
    }

    /// Reaction wrench on both attachments, each in its body's own frame.
    ///
    /// Recomputed on every call from the back-end's current solution.
    pub fn force_torque(&self, sim: &Simulation<A::Physics>) -> JointWrench {
        let result = self.try_force_torque(sim);
        self.core.soft(result, JointWrench::ZERO)
    }

    pub fn try_force_torque(&self, sim: &Simulation<A::Physics>) -> Result<JointWrench, JointError> {
        const OP: &str = "force_torque";
        let reaction = self.call(sim, OP, |adapter, world, physics| {
            adapter.reaction(physics, world)
        })?;
        let rotation = |link: Option<LinkId>| match link {
            Some(id) => sim
                .world()
                .link_pose(id)
                .map(|p| p.rotation)
                .ok_or(JointError::StaleLink { op: OP }),
            None => Ok(DQuat::IDENTITY),
        };
        Ok(frame::express_wrench(
            reaction,
            self.core.reversed,
            rotation(self.core.parent)?,
            rotation(self.core.child)?,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapter::{
        Assembly, AssemblySpec, PhysicsEngine, Reaction, SpringDamper, unsupported,
    };
    use crate::description::AxisDescription;
    use approx::assert_relative_eq;
    use mechspace_common::SpatialForce;
    use mechspace_kernel::Link;

    /// Records what joints push through the adapter seam.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub efforts: Vec<(usize, f64)>,
        pub springs: Vec<(usize, SpringDamper)>,
        pub axes: Vec<(usize, DVec3)>,
        pub gears: Vec<GearSpec>,
        pub reaction: Reaction,
        pub reversed: bool,
        pub detached: usize,
        pub steps: usize,
        pub effort_limits: Vec<(usize, f64)>,
        pub rates: Vec<(usize, f64)>,
        /// Make `apply_effort` fail as if the constraint were gone.
        pub reject_effort: bool,
    }

    impl PhysicsEngine for Recorder {
        const NAME: &'static str = "recorder";

        fn step(&mut self, _world: &mut World) {
            self.steps += 1;
        }
    }

    #[derive(Debug)]
    pub struct RecordingAdapter {
        axes: Vec<DVec3>,
    }

    impl BackendAdapter for RecordingAdapter {
        type Physics = Recorder;

        fn assemble(
            physics: &mut Recorder,
            _world: &World,
            spec: &AssemblySpec<'_>,
        ) -> Result<(Self, Assembly), LoadError> {
            if let Some(gear) = spec.gear {
                physics.gears.push(gear);
            }
            Ok((
                Self {
                    axes: spec.axes.clone(),
                },
                Assembly {
                    reversed: physics.reversed,
                },
            ))
        }

        fn set_axis(
            &mut self,
            physics: &mut Recorder,
            _world: &World,
            index: usize,
            axis: DVec3,
        ) -> Result<(), JointError> {
            self.axes[index] = axis;
            physics.axes.push((index, axis));
            Ok(())
        }

        fn global_axis(&self, _: &Recorder, _: &World, index: usize) -> Result<DVec3, JointError> {
            Ok(self.axes[index])
        }

        fn apply_effort(
            &mut self,
            physics: &mut Recorder,
            index: usize,
            effort: f64,
        ) -> Result<(), JointError> {
            if physics.reject_effort {
                return Err(JointError::Detached { op: "apply_effort" });
            }
            physics.efforts.push((index, effort));
            Ok(())
        }

        fn set_effort_limit(
            &mut self,
            physics: &mut Recorder,
            index: usize,
            effort: f64,
        ) -> Result<(), JointError> {
            physics.effort_limits.push((index, effort));
            Ok(())
        }

        fn set_velocity(
            &mut self,
            physics: &mut Recorder,
            _world: &World,
            index: usize,
            rate: f64,
        ) -> Result<(), JointError> {
            physics.rates.push((index, rate));
            Ok(())
        }

        fn set_spring_damper(
            &mut self,
            physics: &mut Recorder,
            index: usize,
            params: SpringDamper,
        ) -> Result<(), JointError> {
            physics.springs.push((index, params));
            Ok(())
        }

        fn reaction(&self, physics: &Recorder, _: &World) -> Result<Reaction, JointError> {
            Ok(physics.reaction)
        }

        fn angle(&self, _: &Recorder, _: &World, index: usize) -> Result<f64, JointError> {
            Ok(0.1 * (index + 1) as f64)
        }

        fn velocity(&self, _: &Recorder, _: &World, _: usize) -> Result<f64, JointError> {
            Err(unsupported::<Self>("velocity"))
        }

        fn couple_axes(
            &mut self,
            physics: &mut Recorder,
            _world: &World,
            gear: GearSpec,
        ) -> Result<(), JointError> {
            physics.gears.push(gear);
            Ok(())
        }

        fn detach(&mut self, physics: &mut Recorder) {
            physics.detached += 1;
        }
    }

    pub fn pendulum_sim(reversed: bool) -> Simulation<Recorder> {
        let mut world = World::new();
        let model = world.spawn_model(
            "pendulum",
            Transform::from_rotation(DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2)),
        );
        world.spawn_link(Link::new("base", model, Transform::IDENTITY, 5.0));
        world.spawn_link(Link::new(
            "bob",
            model,
            Transform::from_position(DVec3::new(0.0, 0.0, -1.0)),
            1.0,
        ));
        let physics = Recorder {
            reversed,
            ..Default::default()
        };
        Simulation::new(world, physics)
    }

    fn loaded(sim: &Simulation<Recorder>, effort: f64) -> Joint<RecordingAdapter> {
        let mut joint = Joint::new(JointKind::Hinge);
        let axis = AxisDescription::new(DVec3::X)
            .with_effort_limit(effort)
            .with_damping(0.3);
        joint
            .load(
                sim.world(),
                JointDescription::hinge("pivot", "pendulum", Some("base"), Some("bob"), axis),
            )
            .unwrap();
        joint
    }

    fn ready(sim: &mut Simulation<Recorder>, effort: f64) -> Joint<RecordingAdapter> {
        let mut joint = loaded(sim, effort);
        joint.init(sim).unwrap();
        joint
    }

    #[test]
    fn lifecycle_runs_in_order() {
        let mut sim = pendulum_sim(false);
        let mut joint = loaded(&sim, -1.0);
        assert_eq!(joint.state(), JointState::Loaded);
        joint.init(&mut sim).unwrap();
        assert_eq!(joint.state(), JointState::Initialized);
        joint.update(sim.world());
        assert_eq!(joint.state(), JointState::Active);
        assert!(matches!(joint.init(&mut sim), Err(LoadError::State { .. })));
        joint.detach(&mut sim);
        joint.detach(&mut sim);
        assert_eq!(joint.state(), JointState::Detached);
        assert_eq!(sim.physics().detached, 1);
    }

    #[test]
    fn init_pushes_stored_dynamics() {
        let mut sim = pendulum_sim(false);
        let _joint = ready(&mut sim, -1.0);
        assert_eq!(sim.physics().springs.len(), 1);
        assert_eq!(sim.physics().springs[0].1.damping, 0.3);
    }

    #[test]
    fn effort_accumulates_with_clamp() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, 10.0);
        joint.set_force(&mut sim, 0, 6.0);
        joint.set_force(&mut sim, 0, 6.0);
        assert_eq!(joint.force(0), 10.0);
        assert_eq!(sim.physics().efforts.last(), Some(&(0, 10.0)));

        sim.step();
        joint.set_force(&mut sim, 0, 15.0);
        joint.set_force(&mut sim, 0, -8.0);
        assert_eq!(joint.force(0), 2.0);
    }

    #[test]
    fn rejected_effort_keeps_the_previous_total() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, 10.0);
        joint.set_force(&mut sim, 0, 4.0);
        sim.physics_mut().reject_effort = true;
        joint.set_force(&mut sim, 0, 5.0);
        assert_eq!(joint.force(0), 4.0);
        sim.physics_mut().reject_effort = false;
        joint.set_force(&mut sim, 0, 1.0);
        assert_eq!(joint.force(0), 5.0);
        assert_eq!(sim.physics().efforts, vec![(0, 4.0), (0, 5.0)]);
        assert!(matches!(
            joint.drain_notices()[..],
            [JointNotice {
                error: JointError::Detached { .. },
                ..
            }]
        ));
    }

    #[test]
    fn rejected_effort_after_time_advances_keeps_old_stamp() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        joint.set_force(&mut sim, 0, 2.0);
        sim.step();
        sim.physics_mut().reject_effort = true;
        joint.set_force(&mut sim, 0, 3.0);
        assert_eq!(joint.force(0), 2.0);
        assert_eq!(joint.core().forces.stamp(), Some(0.0));
    }

    #[test]
    fn max_force_is_stored_and_pushed() {
        let mut sim = pendulum_sim(false);
        let mut joint = loaded(&sim, -1.0);
        assert_eq!(joint.max_force(0), -1.0);
        joint.set_max_force(&mut sim, 0, 3.0);
        assert!(sim.physics().effort_limits.is_empty());
        joint.init(&mut sim).unwrap();
        joint.set_force(&mut sim, 0, 5.0);
        assert_eq!(joint.force(0), 3.0);

        joint.set_max_force(&mut sim, 0, 8.0);
        assert_eq!(joint.max_force(0), 8.0);
        assert_eq!(sim.physics().effort_limits, vec![(0, 8.0)]);
        joint.set_max_force(&mut sim, 0, f64::NAN);
        assert_eq!(joint.max_force(0), 8.0);
        assert!(matches!(
            joint.drain_notices()[..],
            [JointNotice {
                error: JointError::InvalidArgument { .. },
                ..
            }]
        ));
    }

    #[test]
    fn set_velocity_reaches_the_adapter_and_wakes_links() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        let child = joint.child().unwrap();
        sim.world_mut().set_enabled(child, false);
        joint.set_velocity(&mut sim, 0, 1.5);
        assert_eq!(sim.physics().rates, vec![(0, 1.5)]);
        assert!(sim.world().link(child).unwrap().enabled);

        joint.set_velocity(&mut sim, 0, f64::INFINITY);
        joint.set_velocity(&mut sim, 1, 1.0);
        assert_eq!(sim.physics().rates.len(), 1);
        let notices = joint.drain_notices();
        assert!(matches!(notices[0].error, JointError::InvalidArgument { .. }));
        assert!(matches!(notices[1].error, JointError::Index { .. }));
    }

    #[test]
    fn link_wrench_defaults_to_unsupported() {
        let mut sim = pendulum_sim(false);
        let joint = ready(&mut sim, -1.0);
        assert_eq!(joint.link_force(&sim, 0), DVec3::ZERO);
        assert_eq!(joint.link_torque(&sim, 1), DVec3::ZERO);
        assert_eq!(joint.link_force(&sim, 2), DVec3::ZERO);
        let ops: Vec<_> = joint.notices().iter().map(|n| n.error.clone()).collect();
        assert_eq!(
            ops[..2],
            [
                JointError::Unsupported {
                    op: "link_force",
                    backend: "recorder"
                },
                JointError::Unsupported {
                    op: "link_torque",
                    backend: "recorder"
                },
            ]
        );
        assert!(matches!(ops[2], JointError::Index { index: 2, count: 2, .. }));
    }

    #[test]
    fn params_route_to_their_setters() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        joint.set_param(&mut sim, 0, AxisParam::MaxForce, 4.0);
        joint.set_param(&mut sim, 0, AxisParam::Stiffness, 7.0);
        joint.set_param(&mut sim, 0, AxisParam::SpringReference, 0.25);
        joint.set_param(&mut sim, 0, AxisParam::Velocity, 0.5);
        assert_eq!(joint.param(&sim, 0, AxisParam::MaxForce), 4.0);
        assert_eq!(joint.param(&sim, 0, AxisParam::Stiffness), 7.0);
        assert_eq!(joint.param(&sim, 0, AxisParam::Damping), 0.3);
        assert_eq!(joint.param(&sim, 0, AxisParam::SpringReference), 0.25);
        assert_eq!(sim.physics().rates, vec![(0, 0.5)]);
        assert_eq!(sim.physics().springs.last().unwrap().1.reference, 0.25);
    }

    #[test]
    fn degenerate_axis_is_recorded() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        joint.set_axis(&mut sim, 0, DVec3::ZERO);
        assert_eq!(joint.local_axis(0), DVec3::X);
        assert!(sim.physics().axes.is_empty());
        assert_eq!(
            joint.drain_notices()[0].error,
            JointError::InvalidArgument {
                op: "set_axis",
                reason: "axis has no direction"
            }
        );
    }

    #[test]
    fn set_force_wakes_both_links() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        let (parent, child) = (joint.parent().unwrap(), joint.child().unwrap());
        sim.world_mut().set_enabled(parent, false);
        sim.world_mut().set_enabled(child, false);
        joint.set_force(&mut sim, 0, 1.0);
        assert!(sim.world().link(parent).unwrap().enabled);
        assert!(sim.world().link(child).unwrap().enabled);
    }

    #[test]
    fn out_of_range_index_is_soft() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        assert_eq!(joint.force(1), 0.0);
        assert_eq!(joint.anchor(&sim, 3), DVec3::ZERO);
        joint.set_stiffness(&mut sim, 2, 4.0);
        joint.set_damping(&mut sim, 2, 4.0);
        joint.set_force(&mut sim, 1, 4.0);
        let notices = joint.drain_notices();
        assert_eq!(notices.len(), 5);
        assert!(
            notices
                .iter()
                .all(|n| matches!(n.error, JointError::Index { .. }))
        );
        assert!(sim.physics().efforts.is_empty());
    }

    #[test]
    fn unsupported_primitive_is_soft() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        assert_eq!(joint.velocity(&sim, 0), 0.0);
        joint.set_anchor(&mut sim, 0, DVec3::ONE);
        let notices = joint.drain_notices();
        assert_eq!(notices.len(), 2);
        assert_eq!(
            notices[1].error,
            JointError::Unsupported {
                op: "set_anchor",
                backend: "recorder"
            }
        );
    }

    #[test]
    fn stiffness_before_init_is_stored() {
        let mut sim = pendulum_sim(false);
        let mut joint = loaded(&sim, -1.0);
        joint.set_stiffness_damping(&mut sim, 0, 12.0, 0.5, 0.2);
        assert!(sim.physics().springs.is_empty());
        assert_eq!(joint.stiffness(0), 12.0);
        joint.init(&mut sim).unwrap();
        let (_, pushed) = sim.physics().springs[0];
        assert_eq!(pushed.stiffness, 12.0);
        assert_eq!(pushed.reference, 0.2);
    }

    #[test]
    fn set_axis_uses_model_frame() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        // model is yawed 90 degrees, so model +X is world +Y
        assert_relative_eq!(joint.global_axis(&sim, 0).y, 1.0, epsilon = 1e-12);
        joint.set_axis(&mut sim, 0, DVec3::new(0.0, 2.0, 0.0));
        assert_eq!(joint.local_axis(0), DVec3::Y);
        let pushed = sim.physics().axes[0].1;
        assert_relative_eq!(pushed.x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn wrench_follows_reversed_flag() {
        let reaction = Reaction {
            inboard: SpatialForce::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -9.81)),
            outboard: SpatialForce::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 9.81)),
        };
        for reversed in [false, true] {
            let mut sim = pendulum_sim(reversed);
            sim.physics_mut().reaction = reaction;
            let joint = ready(&mut sim, -1.0);
            assert_eq!(joint.reversed(), reversed);
            let w = joint.force_torque(&sim);
            let expected = if reversed { -9.81 } else { 9.81 };
            assert_relative_eq!(w.body1_force.z, expected);
            assert_relative_eq!(w.body2_force.z, -expected);
        }
    }

    #[test]
    fn detached_joint_answers_defaults() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        let (parent, child) = (joint.parent().unwrap(), joint.child().unwrap());
        assert!(joint.are_connected(child, parent));
        joint.detach(&mut sim);
        assert!(!joint.are_connected(child, parent));
        assert_eq!(joint.angle(&sim, 0), 0.0);
        assert_eq!(joint.force_torque(&sim), JointWrench::ZERO);
        assert!(matches!(
            joint.notices()[0].error,
            JointError::Detached { .. }
        ));
    }

    #[test]
    fn uninitialized_joint_answers_defaults() {
        let sim = pendulum_sim(false);
        let joint = loaded(&sim, -1.0);
        assert_eq!(joint.angle(&sim, 0), 0.0);
        assert!(matches!(
            joint.notices()[0].error,
            JointError::NotInitialized { .. }
        ));
    }

    #[test]
    fn reset_clears_forces() {
        let mut sim = pendulum_sim(false);
        let mut joint = ready(&mut sim, -1.0);
        joint.set_force(&mut sim, 0, 3.0);
        joint.reset();
        assert_eq!(joint.force(0), 0.0);
    }

    #[test]
    fn link_by_index() {
        let mut sim = pendulum_sim(false);
        let joint = ready(&mut sim, -1.0);
        assert_eq!(joint.link(0), joint.child());
        assert_eq!(joint.link(1), joint.parent());
        assert_eq!(joint.link(2), None);
    }
}
