use crate::adapter::{BackendAdapter, CouplingGeometry, GearSpec, Simulation};
use crate::core::JointState;
use crate::description::{JointDescription, JointKind, WORLD_FRAME};
use crate::error::{JointError, LoadError};
use crate::joint::Joint;
use mechspace_common::LinkId;
use mechspace_kernel::World;
use std::ops::{Deref, DerefMut};

pub const DEFAULT_GEAR_RATIO: f64 = 1.0;

/// Two-axis joint whose axis-1 rate is `ratio` times its axis-0 rate,
/// both measured relative to a reference body.
#[derive(Debug)]
pub struct GearboxJoint<A: BackendAdapter> {
    joint: Joint<A>,
    ratio: f64,
    reference: Option<LinkId>,
}

impl<A: BackendAdapter> GearboxJoint<A> {
    pub const ANGLE_COUNT: usize = 2;

    pub fn new() -> Self {
        Self {
            joint: Joint::new(JointKind::Gearbox),
            ratio: DEFAULT_GEAR_RATIO,
            reference: None,
        }
    }

    pub fn load(&mut self, world: &World, description: JointDescription) -> Result<(), LoadError> {
        let ratio = description.gear_ratio.unwrap_or(DEFAULT_GEAR_RATIO);
        let reference = description
            .gear_reference
            .clone()
            .filter(|name| !name.is_empty() && name != WORLD_FRAME);
        self.joint.load(world, description)?;
        self.ratio = ratio;
        self.reference = reference
            .map(|name| self.joint.core().resolve_link(world, &name))
            .transpose()?;
        Ok(())
    }

    /// Load from the older document layout, including its
    /// `gearbox_ratio` and `gearbox_reference_body` fields.
    #[deprecated(note = "build a JointDescription and call load() directly")]
    #[allow(deprecated)]
    pub fn load_document(
        &mut self,
        world: &World,
        model: &str,
        document: &serde_json::Value,
    ) -> Result<(), LoadError> {
        let description = JointDescription::from_document(model, document)?;
        self.load(world, description)
    }

    pub fn init(&mut self, sim: &mut Simulation<A::Physics>) -> Result<(), LoadError> {
        let gear = self.gear_spec();
        self.joint.init_with(sim, Some(gear))
    }

    pub fn gear_ratio(&self) -> f64 {
        self.ratio
    }

    /// Reference body, `None` for the world frame.
    pub fn reference_body(&self) -> Option<LinkId> {
        self.reference
    }

    fn gear_spec(&self) -> GearSpec {
        GearSpec {
            ratio: self.ratio,
            reference: self.reference,
        }
    }

    /// Change the ratio and rebuild the coupling.
    pub fn set_gear_ratio(&mut self, sim: &mut Simulation<A::Physics>, ratio: f64) {
        if !ratio.is_finite() {
            let result = Err(JointError::InvalidArgument {
                op: "set_gear_ratio",
                reason: "gear ratio is not finite",
            });
            self.joint.soft(result, ());
            return;
        }
        self.ratio = ratio;
        self.recouple(sim, "set_gear_ratio");
    }

    /// Change the reference body and rebuild the coupling from its current
    /// pose.
    pub fn set_reference_body(&mut self, sim: &mut Simulation<A::Physics>, reference: Option<LinkId>) {
        const OP: &str = "set_reference_body";
        if let Some(id) = reference {
            if sim.world().link(id).is_none() {
                let result = Err(JointError::StaleLink { op: OP });
                self.joint.soft(result, ());
                return;
            }
        }
        self.reference = reference;
        self.recouple(sim, OP);
    }

    fn recouple(&mut self, sim: &mut Simulation<A::Physics>, op: &'static str) {
        // stored values are picked up at init
        if self.joint.state() == JointState::Loaded {
            return;
        }
        let gear = self.gear_spec();
        let result = self.joint.call_mut(sim, op, |adapter, world, physics| {
            adapter.couple_axes(physics, world, gear)
        });
        self.joint.soft(result, ());
        tracing::debug!(joint = %self.joint.name(), ratio = gear.ratio, reference = ?gear.reference, op, "gear recoupled");
    }

    /// Coupling geometry as the back-end currently enforces it.
    pub fn coupling(&self, sim: &Simulation<A::Physics>) -> Option<CouplingGeometry> {
        let result = self.joint.call(sim, "coupling", |adapter, _world, physics| {
            adapter.coupling(physics)
        });
        self.joint.soft(result.map(Some), None)
    }

    pub fn into_inner(self) -> Joint<A> {
        self.joint
    }
}

impl<A: BackendAdapter> Default for GearboxJoint<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: BackendAdapter> Deref for GearboxJoint<A> {
    type Target = Joint<A>;

    fn deref(&self) -> &Joint<A> {
        &self.joint
    }
}

impl<A: BackendAdapter> DerefMut for GearboxJoint<A> {
    fn deref_mut(&mut self) -> &mut Joint<A> {
        &mut self.joint
    }
}
