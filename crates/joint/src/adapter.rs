use crate::description::{AxisLimit, JointKind};
use crate::error::{JointError, LoadError};
use glam::DVec3;
use mechspace_common::{LinkId, SpatialForce, Transform};
use mechspace_kernel::World;

/// A rigid-body solver that advances link poses one step.
pub trait PhysicsEngine {
    /// Short back-end name used in diagnostics.
    const NAME: &'static str;

    /// Integrate one step of `world.step_size()` seconds and write the
    /// resulting link poses back into `world`.
    fn step(&mut self, world: &mut World);
}

/// Owns a world and the back-end context that integrates it.
///
/// Joints are not owned here; they borrow the simulation per call.
#[derive(Debug)]
pub struct Simulation<P> {
    world: World,
    physics: P,
}

impl<P: PhysicsEngine> Simulation<P> {
    pub fn new(world: World, physics: P) -> Self {
        Self { world, physics }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    /// Borrow both halves at once.
    pub fn split_mut(&mut self) -> (&mut World, &mut P) {
        (&mut self.world, &mut self.physics)
    }

    /// One solve followed by one clock advance.
    pub fn step(&mut self) {
        let _span = tracing::info_span!("sim_step", engine = P::NAME, tick = self.world.tick())
            .entered();
        self.physics.step(&mut self.world);
        self.world.advance();
    }
}

/// Spring/damper parameters of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpringDamper {
    pub stiffness: f64,
    pub damping: f64,
    /// Angle at which the spring exerts no torque.
    pub reference: f64,
}

/// Gear coupling request: axis-1 rate = `ratio` × axis-0 rate, both measured
/// relative to `reference` (the world when `None`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearSpec {
    pub ratio: f64,
    pub reference: Option<LinkId>,
}

/// Everything a back-end needs to build its native constraint.
#[derive(Debug, Clone)]
pub struct AssemblySpec<'a> {
    pub name: &'a str,
    pub kind: JointKind,
    pub parent: Option<LinkId>,
    pub child: Option<LinkId>,
    /// Joint frame in world coordinates.
    pub joint_frame: Transform,
    /// Axis directions in world coordinates, one per angle.
    pub axes: Vec<DVec3>,
    pub limits: Vec<AxisLimit>,
    pub loop_break: bool,
    pub gear: Option<GearSpec>,
}

/// Facts about the native constraint decided at assembly time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assembly {
    /// The back-end's inboard body is the joint's child.
    pub reversed: bool,
}

/// Constraint reaction on the two attachment bodies as the back-end orders
/// them, in the ground frame. Each half is the force the joint exerts on
/// that body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reaction {
    pub inboard: SpatialForce,
    pub outboard: SpatialForce,
}

/// Geometry of a gear coupling as the back-end currently enforces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CouplingGeometry {
    pub ratio: f64,
    pub reference: Option<LinkId>,
    /// World pose of the reference frame the axes were derived in.
    pub frame: Transform,
    /// Axis 0 and axis 1 expressed in `frame`.
    pub axes: [DVec3; 2],
}

/// Capability interface every physics back-end implements once.
///
/// An adapter holds only the back-end's handle for one native constraint;
/// the native context itself is owned elsewhere and passed in per call.
/// Optional primitives default to `JointError::Unsupported`.
pub trait BackendAdapter: Sized {
    type Physics: PhysicsEngine;

    /// Build the native constraint.
    fn assemble(
        physics: &mut Self::Physics,
        world: &World,
        spec: &AssemblySpec<'_>,
    ) -> Result<(Self, Assembly), LoadError>;

    /// Replace an axis direction, given in world coordinates.
    fn set_axis(
        &mut self,
        physics: &mut Self::Physics,
        world: &World,
        index: usize,
        axis: DVec3,
    ) -> Result<(), JointError>;

    /// Current axis direction in world coordinates.
    fn global_axis(
        &self,
        physics: &Self::Physics,
        world: &World,
        index: usize,
    ) -> Result<DVec3, JointError>;

    /// Set the total actuation effort for the next solve.
    fn apply_effort(
        &mut self,
        physics: &mut Self::Physics,
        index: usize,
        effort: f64,
    ) -> Result<(), JointError>;

    fn set_spring_damper(
        &mut self,
        physics: &mut Self::Physics,
        index: usize,
        params: SpringDamper,
    ) -> Result<(), JointError>;

    fn set_friction(
        &mut self,
        _physics: &mut Self::Physics,
        _index: usize,
        _friction: f64,
    ) -> Result<(), JointError> {
        Err(unsupported::<Self>("set_friction"))
    }

    /// Replace the effort bound of an axis. A negative value removes it.
    fn set_effort_limit(
        &mut self,
        _physics: &mut Self::Physics,
        _index: usize,
        _effort: f64,
    ) -> Result<(), JointError> {
        Err(unsupported::<Self>("set_effort_limit"))
    }

    /// Set the rate of an axis for the next solve.
    fn set_velocity(
        &mut self,
        _physics: &mut Self::Physics,
        _world: &World,
        _index: usize,
        _rate: f64,
    ) -> Result<(), JointError> {
        Err(unsupported::<Self>("set_velocity"))
    }

    /// Force on attachment `index` (0 child, 1 parent) in world
    /// coordinates.
    fn link_force(
        &self,
        _physics: &Self::Physics,
        _world: &World,
        _index: usize,
    ) -> Result<DVec3, JointError> {
        Err(unsupported::<Self>("link_force"))
    }

    /// Torque on attachment `index` (0 child, 1 parent) in world
    /// coordinates.
    fn link_torque(
        &self,
        _physics: &Self::Physics,
        _world: &World,
        _index: usize,
    ) -> Result<DVec3, JointError> {
        Err(unsupported::<Self>("link_torque"))
    }

    /// Raw constraint reaction, recomputed on every call.
    fn reaction(&self, physics: &Self::Physics, world: &World) -> Result<Reaction, JointError>;

    fn angle(&self, physics: &Self::Physics, world: &World, index: usize)
    -> Result<f64, JointError>;

    fn velocity(
        &self,
        physics: &Self::Physics,
        world: &World,
        index: usize,
    ) -> Result<f64, JointError>;

    /// (Re)build a gear coupling between axis 0 and axis 1, deriving its
    /// geometry from the reference body's current pose.
    fn couple_axes(
        &mut self,
        _physics: &mut Self::Physics,
        _world: &World,
        _gear: GearSpec,
    ) -> Result<(), JointError> {
        Err(unsupported::<Self>("couple_axes"))
    }

    fn coupling(&self, _physics: &Self::Physics) -> Result<CouplingGeometry, JointError> {
        Err(unsupported::<Self>("coupling"))
    }

    /// Move the constraint point, given in world coordinates.
    fn set_anchor(
        &mut self,
        _physics: &mut Self::Physics,
        _world: &World,
        _index: usize,
        _anchor: DVec3,
    ) -> Result<(), JointError> {
        Err(unsupported::<Self>("set_anchor"))
    }

    fn anchor(
        &self,
        _physics: &Self::Physics,
        _world: &World,
        _index: usize,
    ) -> Result<DVec3, JointError> {
        Err(unsupported::<Self>("anchor"))
    }

    /// Release the native constraint's hold on the joint's links.
    fn detach(&mut self, physics: &mut Self::Physics);
}

/// `Unsupported` error naming the adapter's back-end.
pub fn unsupported<A: BackendAdapter>(op: &'static str) -> JointError {
    JointError::Unsupported {
        op,
        backend: <A::Physics as PhysicsEngine>::NAME,
    }
}
