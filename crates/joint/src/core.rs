use crate::adapter::{AssemblySpec, GearSpec, SpringDamper};
use crate::description::{AxisLimit, JointDescription, JointKind};
use crate::error::{JointError, JointNotice, LoadError};
use crate::frame;
use glam::{DQuat, DVec3};
use mechspace_common::{LinkId, ModelId, Transform};
use mechspace_kernel::World;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Notices kept per joint; older ones are dropped first.
pub const NOTICE_CAPACITY: usize = 64;

/// Joint lifecycle. `Detached` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointState {
    Unloaded,
    Loaded,
    Initialized,
    Active,
    Detached,
}

/// Per-axis actuation totals for the current simulation time.
///
/// Contributions add up while the reported time stays the same; the first
/// call that observes a strictly greater time clears every axis once.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceAccumulator {
    forces: Vec<f64>,
    stamp: Option<f64>,
}

impl ForceAccumulator {
    pub fn new(angle_count: usize) -> Self {
        Self {
            forces: vec![0.0; angle_count],
            stamp: None,
        }
    }

    /// Add a contribution at time `now` and return the new total.
    ///
    /// The contribution and the resulting total are both truncated to the
    /// axis effort limit.
    pub fn add(&mut self, now: f64, index: usize, value: f64, limit: &AxisLimit) -> f64 {
        let total = self.preview(now, index, value, limit);
        self.commit(now, index, total);
        total
    }

    /// The total `add` would produce, without recording it.
    pub fn preview(&self, now: f64, index: usize, value: f64, limit: &AxisLimit) -> f64 {
        let base = if self.is_stale(now) {
            0.0
        } else {
            self.forces[index]
        };
        limit.clamp_effort(base + limit.clamp_effort(value))
    }

    /// Record `total` as the axis total at time `now`, clearing every axis
    /// first if time has advanced.
    pub fn commit(&mut self, now: f64, index: usize, total: f64) {
        if self.is_stale(now) {
            self.forces.fill(0.0);
            self.stamp = Some(now);
        }
        self.forces[index] = total;
    }

    fn is_stale(&self, now: f64) -> bool {
        self.stamp.is_none_or(|t| now > t)
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.forces.get(index).copied()
    }

    /// Time the current totals belong to.
    pub fn stamp(&self) -> Option<f64> {
        self.stamp
    }

    pub fn reset(&mut self) {
        self.forces.fill(0.0);
        self.stamp = None;
    }
}

/// Backend-agnostic joint state shared by every joint kind.
#[derive(Debug)]
pub struct JointCore {
    name: String,
    kind: JointKind,
    state: JointState,
    description: Option<JointDescription>,
    pub(crate) model: Option<ModelId>,
    pub(crate) parent: Option<LinkId>,
    pub(crate) child: Option<LinkId>,
    child_to_joint: Transform,
    parent_to_joint: Transform,
    pub(crate) reversed: bool,
    pub(crate) forces: ForceAccumulator,
    pub(crate) springs: Vec<SpringDamper>,
    notices: RefCell<VecDeque<JointNotice>>,
    dropped_notices: Cell<u64>,
}

impl JointCore {
    pub fn new(kind: JointKind) -> Self {
        let count = kind.angle_count();
        Self {
            name: String::new(),
            kind,
            state: JointState::Unloaded,
            description: None,
            model: None,
            parent: None,
            child: None,
            child_to_joint: Transform::IDENTITY,
            parent_to_joint: Transform::IDENTITY,
            reversed: false,
            forces: ForceAccumulator::new(count),
            springs: vec![SpringDamper::default(); count],
            notices: RefCell::new(VecDeque::new()),
            dropped_notices: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JointKind {
        self.kind
    }

    pub fn state(&self) -> JointState {
        self.state
    }

    pub fn angle_count(&self) -> usize {
        self.kind.angle_count()
    }

    pub fn description(&self) -> Option<&JointDescription> {
        self.description.as_ref()
    }

    pub fn child_to_joint(&self) -> Transform {
        self.child_to_joint
    }

    pub fn parent_to_joint(&self) -> Transform {
        self.parent_to_joint
    }

    pub(crate) fn set_state(&mut self, state: JointState) {
        tracing::debug!(joint = %self.name, from = ?self.state, to = ?state, "joint state");
        self.state = state;
    }

    /// Validate a description and resolve its model and links.
    pub fn load(&mut self, world: &World, description: JointDescription) -> Result<(), LoadError> {
        if self.state != JointState::Unloaded {
            return Err(LoadError::State {
                joint: description.name,
                op: "load",
                state: self.state,
            });
        }
        description.validate()?;
        if description.kind != self.kind {
            return Err(LoadError::Malformed {
                joint: description.name,
                reason: format!(
                    "{:?} description given to a {:?} joint",
                    description.kind, self.kind
                ),
            });
        }
        if description.axes.len() != self.angle_count() {
            return Err(LoadError::AxisCount {
                joint: description.name.clone(),
                kind: self.kind,
                expected: self.angle_count(),
                found: description.axes.len(),
            });
        }
        let model = world
            .model_by_name(&description.model)
            .ok_or_else(|| LoadError::UnresolvedModel {
                joint: description.name.clone(),
                model: description.model.clone(),
            })?;
        let parent = description
            .parent_link()
            .map(|name| resolve_link(world, model, &description, name))
            .transpose()?;
        let child = description
            .child_link()
            .map(|name| resolve_link(world, model, &description, name))
            .transpose()?;

        for (spring, axis) in self.springs.iter_mut().zip(&description.axes) {
            *spring = SpringDamper {
                stiffness: axis.stiffness,
                damping: axis.damping,
                reference: axis.spring_reference,
            };
        }
        self.name = description.name.clone();
        self.model = Some(model);
        self.parent = parent;
        self.child = child;
        self.child_to_joint = description.pose;
        self.description = Some(description);
        self.set_state(JointState::Loaded);
        Ok(())
    }

    /// Resolve a link name against the joint's model.
    ///
    /// `other_model::link` names a link in another model.
    pub fn resolve_link(&self, world: &World, name: &str) -> Result<LinkId, LoadError> {
        let (Some(model), Some(description)) = (self.model, &self.description) else {
            return Err(LoadError::State {
                joint: self.name.clone(),
                op: "resolve_link",
                state: self.state,
            });
        };
        resolve_link(world, model, description, name)
    }

    /// Derive the world-frame geometry and build the back-end request.
    pub(crate) fn assembly_spec(
        &mut self,
        world: &World,
        gear: Option<GearSpec>,
    ) -> Result<AssemblySpec<'_>, LoadError> {
        let stale = |what: &str| LoadError::Malformed {
            joint: self.name.clone(),
            reason: format!("{what} link vanished before init"),
        };
        let parent_world = match self.parent {
            Some(id) => Some(world.link_pose(id).ok_or_else(|| stale("parent"))?),
            None => None,
        };
        let child_world = match self.child {
            Some(id) => Some(world.link_pose(id).ok_or_else(|| stale("child"))?),
            None => None,
        };
        self.parent_to_joint =
            frame::parent_to_joint(parent_world, child_world, self.child_to_joint);
        let joint_frame = frame::joint_frame_in_world(child_world, self.child_to_joint);

        let axis_rotation = self.axis_rotation(world);
        let description = self.description.as_ref().ok_or_else(|| LoadError::State {
            joint: self.name.clone(),
            op: "init",
            state: self.state,
        })?;
        Ok(AssemblySpec {
            name: &self.name,
            kind: self.kind,
            parent: self.parent,
            child: self.child,
            joint_frame,
            axes: description
                .axes
                .iter()
                .map(|a| (axis_rotation * a.direction).normalize())
                .collect(),
            limits: description.axes.iter().map(|a| a.limit).collect(),
            loop_break: description.loop_break,
            gear,
        })
    }

    /// Rotation from the frame stored axis directions are given in to the
    /// world.
    ///
    /// Hinge axes are in the joint model's frame. Gearbox axes are in the
    /// parent link's model frame, which differs when the parent belongs to
    /// another model.
    pub fn axis_rotation(&self, world: &World) -> DQuat {
        let model = match self.kind {
            JointKind::Hinge => self.model,
            JointKind::Gearbox => self
                .parent
                .and_then(|id| world.link(id))
                .map(|link| link.model)
                .or(self.model),
        };
        model
            .and_then(|m| world.model(m))
            .map(|m| m.pose.rotation)
            .unwrap_or(DQuat::IDENTITY)
    }

    /// Replace the stored direction of an axis.
    pub(crate) fn set_local_axis(&mut self, index: usize, direction: DVec3) {
        if let Some(axis) = self.description.as_mut().and_then(|d| d.axes.get_mut(index)) {
            axis.direction = direction;
        }
    }

    /// Replace the effort bound of an axis.
    pub(crate) fn set_effort_limit(&mut self, index: usize, effort: f64) {
        if let Some(axis) = self.description.as_mut().and_then(|d| d.axes.get_mut(index)) {
            axis.limit.effort = effort;
        }
    }

    pub fn limit(&self, index: usize) -> AxisLimit {
        self.description
            .as_ref()
            .and_then(|d| d.axes.get(index))
            .map(|a| a.limit)
            .unwrap_or_default()
    }

    pub fn local_axis(&self, index: usize) -> Option<DVec3> {
        self.description
            .as_ref()
            .and_then(|d| d.axes.get(index))
            .map(|a| a.direction)
    }

    pub fn check_index(&self, op: &'static str, index: usize) -> Result<(), JointError> {
        if index < self.angle_count() {
            Ok(())
        } else {
            Err(JointError::Index {
                op,
                index,
                count: self.angle_count(),
            })
        }
    }

    /// Reject calls that need an assembled constraint.
    pub fn check_live(&self, op: &'static str) -> Result<(), JointError> {
        match self.state {
            JointState::Initialized | JointState::Active => Ok(()),
            JointState::Detached => Err(JointError::Detached { op }),
            JointState::Unloaded | JointState::Loaded => Err(JointError::NotInitialized { op }),
        }
    }

    /// Log a fail-soft error and record it as a notice.
    pub fn notify(&self, error: JointError) {
        let op = error.op();
        match &error {
            JointError::Unsupported { backend, .. } => {
                tracing::debug!(joint = %self.name, op, backend, "operation not supported");
            }
            JointError::Index { index, count, .. } => {
                tracing::error!(joint = %self.name, op, index, count, "axis index out of range");
            }
            JointError::Detached { .. } | JointError::NotInitialized { .. } => {
                tracing::warn!(joint = %self.name, op, state = ?self.state, "joint not active");
            }
            JointError::StaleLink { .. } => {
                tracing::error!(joint = %self.name, op, "link no longer exists");
            }
            JointError::InvalidArgument { reason, .. } => {
                tracing::warn!(joint = %self.name, op, reason, "argument rejected");
            }
        }
        let mut notices = self.notices.borrow_mut();
        if notices.len() >= NOTICE_CAPACITY {
            notices.pop_front();
            self.dropped_notices.set(self.dropped_notices.get() + 1);
        }
        notices.push_back(JointNotice {
            joint: self.name.clone(),
            op,
            error,
        });
    }

    /// Unwrap a per-call result, falling back to `default` on error.
    pub fn soft<T>(&self, result: Result<T, JointError>, default: T) -> T {
        result.unwrap_or_else(|error| {
            self.notify(error);
            default
        })
    }

    /// Recorded notices, oldest first.
    pub fn notices(&self) -> Vec<JointNotice> {
        self.notices.borrow().iter().cloned().collect()
    }

    pub fn drain_notices(&mut self) -> Vec<JointNotice> {
        self.notices.get_mut().drain(..).collect()
    }

    /// Notices discarded because the log was full.
    pub fn dropped_notices(&self) -> u64 {
        self.dropped_notices.get()
    }

    /// Sever the link association.
    pub(crate) fn detach(&mut self) {
        self.parent = None;
        self.child = None;
        self.set_state(JointState::Detached);
    }
}

fn resolve_link(
    world: &World,
    model: ModelId,
    description: &JointDescription,
    name: &str,
) -> Result<LinkId, LoadError> {
    let unresolved = |model_name: &str| LoadError::UnresolvedLink {
        joint: description.name.clone(),
        model: model_name.to_owned(),
        link: name.to_owned(),
    };
    match name.split_once("::") {
        Some((model_name, link_name)) => world
            .model_by_name(model_name)
            .and_then(|m| world.link_by_name(m, link_name))
            .ok_or_else(|| unresolved(model_name)),
        None => world
            .link_by_name(model, name)
            .ok_or_else(|| unresolved(&description.model)),
    }
}
