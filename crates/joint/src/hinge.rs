use crate::adapter::BackendAdapter;
use crate::description::{JointDescription, JointKind};
use crate::error::LoadError;
use crate::joint::Joint;
use mechspace_kernel::World;
use std::ops::{Deref, DerefMut};

/// Single-axis revolute joint.
#[derive(Debug)]
pub struct HingeJoint<A: BackendAdapter>(Joint<A>);

impl<A: BackendAdapter> HingeJoint<A> {
    pub const ANGLE_COUNT: usize = 1;

    pub fn new() -> Self {
        Self(Joint::new(JointKind::Hinge))
    }

    pub fn load(&mut self, world: &World, description: JointDescription) -> Result<(), LoadError> {
        self.0.load(world, description)
    }

    /// Load from the older document layout.
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

    pub fn into_inner(self) -> Joint<A> {
        self.0
    }
}

impl<A: BackendAdapter> Default for HingeJoint<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: BackendAdapter> Deref for HingeJoint<A> {
    type Target = Joint<A>;

    fn deref(&self) -> &Joint<A> {
        &self.0
    }
}

impl<A: BackendAdapter> DerefMut for HingeJoint<A> {
    fn deref_mut(&mut self) -> &mut Joint<A> {
        &mut self.0
    }
}
