//! Mobilizer tree: topology, forward kinematics and body state.

use glam::{DMat3, DQuat, DVec3};
use mechspace_common::{LinkId, Transform};
use mechspace_joint::{AxisLimit, SpringDamper};
use mechspace_kernel::Link;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MobilizerId(pub u64);

/// Why a joint cannot be added to the tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("both endpoints are the world")]
    BothWorld,
    #[error("link {0:?} already has an inboard mobilizer and cannot hang from ground")]
    AlreadyMobilized(LinkId),
    #[error("child {0:?} is mobilized and the parent is the world")]
    ChildMobilizedToWorld(LinkId),
    #[error("joint between {0:?} and {1:?} closes a kinematic loop")]
    Loop(LinkId, LinkId),
}

/// Where a new mobilizer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub inboard: Option<LinkId>,
    pub outboard: LinkId,
    /// Inboard is the joint's child.
    pub reversed: bool,
}

/// A revolute mobilizer: the outboard body turns about `axis` relative to
/// the inboard body (ground when `None`).
///
/// `X_G_out = X_G_in * x_inboard_f * Rot(axis, q) * x_outboard_m⁻¹`.
#[derive(Debug, Clone)]
pub struct Mobilizer {
    pub name: String,
    pub inboard: Option<LinkId>,
    pub outboard: LinkId,
    /// F frame in the inboard body frame.
    pub x_inboard_f: Transform,
    /// M frame in the outboard body frame.
    pub x_outboard_m: Transform,
    /// Unit axis in the F frame.
    pub axis: DVec3,
    /// Joint angle is `sign * q`; -1 for reversed mobilizers.
    pub sign: f64,
    pub q: f64,
    pub u: f64,
    pub udot: f64,
    /// Effective inertia of the outboard subtree about the axis, last step.
    pub inertia: f64,
    /// Actuation in joint coordinates for the next step.
    pub effort: f64,
    pub spring: SpringDamper,
    pub friction: f64,
    pub limit: AxisLimit,
    /// The owning joint detached; the mobilizer stays but is no longer driven.
    pub released: bool,
}

impl Mobilizer {
    pub fn new(name: &str, placement: Placement, joint_frame: Transform, axis: DVec3, poses: [Transform; 2]) -> Self {
        let [inboard_pose, outboard_pose] = poses;
        let x_inboard_f = inboard_pose.inverse() * joint_frame;
        Self {
            name: name.to_owned(),
            inboard: placement.inboard,
            outboard: placement.outboard,
            x_inboard_f,
            x_outboard_m: outboard_pose.inverse() * joint_frame,
            axis: joint_frame.inverse_rotate_vector(axis).normalize(),
            sign: if placement.reversed { -1.0 } else { 1.0 },
            q: 0.0,
            u: 0.0,
            udot: 0.0,
            inertia: 0.0,
            effort: 0.0,
            spring: SpringDamper::default(),
            friction: 0.0,
            limit: AxisLimit::default(),
            released: false,
        }
    }

    pub fn angle(&self) -> f64 {
        self.sign * self.q
    }

    pub fn rate(&self) -> f64 {
        self.sign * self.u
    }

    /// F frame in ground.
    pub fn frame(&self, inboard_pose: Transform) -> Transform {
        inboard_pose * self.x_inboard_f
    }

    pub fn world_axis(&self, inboard_pose: Transform) -> DVec3 {
        self.frame(inboard_pose).rotation * self.axis
    }

    pub fn outboard_pose(&self, inboard_pose: Transform) -> Transform {
        let turn = Transform::from_rotation(DQuat::from_axis_angle(self.axis, self.q));
        self.frame(inboard_pose) * turn * self.x_outboard_m.inverse()
    }

    /// Replace the axis (ground frame) and rezero `q` so the outboard body
    /// keeps its current pose.
    pub fn reseat_axis(&mut self, inboard_pose: Transform, outboard_pose: Transform, axis: DVec3) {
        let frame = self.frame(inboard_pose);
        self.axis = frame.inverse_rotate_vector(axis).normalize();
        self.x_outboard_m = outboard_pose.inverse() * frame;
        self.q = 0.0;
    }
}

/// Kinematic and inertial state of one link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub pose: Transform,
    pub linvel: DVec3,
    pub angvel: DVec3,
    pub linacc: DVec3,
    pub angacc: DVec3,
    pub mass: f64,
    /// Principal moments in the body frame.
    pub inertia: DVec3,
    /// Kinematic or asleep: its inboard mobilizer does not move.
    pub locked: bool,
}

impl BodyState {
    pub fn from_link(link: &Link) -> Self {
        Self {
            pose: link.pose,
            linvel: DVec3::ZERO,
            angvel: DVec3::ZERO,
            linacc: DVec3::ZERO,
            angacc: DVec3::ZERO,
            mass: link.mass.max(0.0),
            inertia: link.inertia,
            locked: link.kinematic || !link.enabled,
        }
    }

    pub fn refresh(&mut self, link: &Link) {
        self.pose = link.pose;
        self.mass = link.mass.max(0.0);
        self.inertia = link.inertia;
        self.locked = link.kinematic || !link.enabled;
    }

    pub fn inertia_world(&self) -> DMat3 {
        let r = DMat3::from_quat(self.pose.rotation);
        r * DMat3::from_diagonal(self.inertia) * r.transpose()
    }
}

/// The mobilizer forest. Bodies with no inboard mobilizer are welded to
/// ground.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    mobilizers: BTreeMap<MobilizerId, Mobilizer>,
    by_outboard: BTreeMap<LinkId, MobilizerId>,
    /// Base-to-tip order.
    order: Vec<MobilizerId>,
    /// Outboard body of each mobilizer plus everything beyond it.
    subtrees: BTreeMap<MobilizerId, Vec<LinkId>>,
    next_id: u64,
}

impl Tree {
    pub fn len(&self) -> usize {
        self.mobilizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mobilizers.is_empty()
    }

    pub fn get(&self, id: MobilizerId) -> Option<&Mobilizer> {
        self.mobilizers.get(&id)
    }

    pub fn get_mut(&mut self, id: MobilizerId) -> Option<&mut Mobilizer> {
        self.mobilizers.get_mut(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&MobilizerId, &mut Mobilizer)> {
        self.mobilizers.iter_mut()
    }

    pub fn order(&self) -> &[MobilizerId] {
        &self.order
    }

    pub fn subtree(&self, id: MobilizerId) -> &[LinkId] {
        self.subtrees.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn inboard_of(&self, link: LinkId) -> Option<MobilizerId> {
        self.by_outboard.get(&link).copied()
    }

    /// Whether `ancestor` is `link` or lies on its path to ground.
    pub fn is_ancestor(&self, ancestor: LinkId, link: LinkId) -> bool {
        let mut current = link;
        loop {
            if current == ancestor {
                return true;
            }
            match self
                .inboard_of(current)
                .and_then(|m| self.mobilizers.get(&m))
                .and_then(|m| m.inboard)
            {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Decide which end of a joint becomes the outboard body.
    ///
    /// The child is outboard unless it is already mobilized or a loop break
    /// was requested, in which case the mobilizer is reversed.
    pub fn place(
        &self,
        parent: Option<LinkId>,
        child: Option<LinkId>,
        loop_break: bool,
    ) -> Result<Placement, TopologyError> {
        let child = match (parent, child) {
            (None, None) => return Err(TopologyError::BothWorld),
            (Some(p), None) => {
                if self.inboard_of(p).is_some() {
                    return Err(TopologyError::AlreadyMobilized(p));
                }
                return Ok(Placement {
                    inboard: None,
                    outboard: p,
                    reversed: true,
                });
            }
            (_, Some(c)) => c,
        };
        if self.inboard_of(child).is_none() && !loop_break {
            if let Some(p) = parent {
                if self.is_ancestor(child, p) {
                    return Err(TopologyError::Loop(p, child));
                }
            }
            return Ok(Placement {
                inboard: parent,
                outboard: child,
                reversed: false,
            });
        }
        let Some(p) = parent else {
            return Err(TopologyError::ChildMobilizedToWorld(child));
        };
        if self.inboard_of(p).is_some() || self.is_ancestor(p, child) {
            return Err(TopologyError::Loop(p, child));
        }
        Ok(Placement {
            inboard: Some(child),
            outboard: p,
            reversed: true,
        })
    }

    pub fn insert(&mut self, mobilizer: Mobilizer) -> MobilizerId {
        self.next_id += 1;
        let id = MobilizerId(self.next_id);
        self.by_outboard.insert(mobilizer.outboard, id);
        self.mobilizers.insert(id, mobilizer);
        self.rebuild();
        id
    }

    /// Recompute the base-to-tip order and the subtrees.
    fn rebuild(&mut self) {
        let mut children: BTreeMap<Option<LinkId>, Vec<MobilizerId>> = BTreeMap::new();
        for (id, m) in &self.mobilizers {
            // an unmobilized inboard body is welded, so it acts as a root
            let key = m.inboard.filter(|b| self.by_outboard.contains_key(b));
            children.entry(key).or_default().push(*id);
        }
        self.order.clear();
        let mut queue: VecDeque<MobilizerId> = children.get(&None).cloned().unwrap_or_default().into();
        while let Some(id) = queue.pop_front() {
            self.order.push(id);
            if let Some(m) = self.mobilizers.get(&id) {
                if let Some(next) = children.get(&Some(m.outboard)) {
                    queue.extend(next.iter().copied());
                }
            }
        }
        self.subtrees.clear();
        for id in self.order.iter().rev() {
            let Some(m) = self.mobilizers.get(id) else {
                continue;
            };
            let mut links = vec![m.outboard];
            for child in children.get(&Some(m.outboard)).into_iter().flatten() {
                links.extend(self.subtrees.get(child).into_iter().flatten().copied());
            }
            self.subtrees.insert(*id, links);
        }
    }

    /// Angular velocity of a link from the rates along its path to ground.
    pub fn angular_velocity(&self, bodies: &BTreeMap<LinkId, BodyState>, link: Option<LinkId>) -> DVec3 {
        let mut omega = DVec3::ZERO;
        let mut current = link;
        while let Some(l) = current {
            let Some(m) = self.inboard_of(l).and_then(|id| self.mobilizers.get(&id)) else {
                break;
            };
            omega += m.world_axis(pose_of(bodies, m.inboard)) * m.u;
            current = m.inboard;
        }
        omega
    }

    /// Forward kinematics, base to tip.
    pub fn place_bodies(&self, bodies: &mut BTreeMap<LinkId, BodyState>) {
        for id in &self.order {
            let m = &self.mobilizers[id];
            let inboard_pose = pose_of(bodies, m.inboard);
            if let Some(body) = bodies.get_mut(&m.outboard) {
                body.pose = m.outboard_pose(inboard_pose);
            }
        }
    }

    /// Velocity kinematics, base to tip. Welded bodies are at rest.
    pub fn propagate_velocities(&self, bodies: &mut BTreeMap<LinkId, BodyState>) {
        for (link, body) in bodies.iter_mut() {
            if self.inboard_of(*link).is_none() {
                body.linvel = DVec3::ZERO;
                body.angvel = DVec3::ZERO;
            }
        }
        for id in &self.order {
            let m = &self.mobilizers[id];
            let (in_pose, in_v, in_w) = match m.inboard.and_then(|b| bodies.get(&b)) {
                Some(b) => (b.pose, b.linvel, b.angvel),
                None => (Transform::IDENTITY, DVec3::ZERO, DVec3::ZERO),
            };
            let frame = m.frame(in_pose);
            let spin = frame.rotation * m.axis * m.u;
            if let Some(body) = bodies.get_mut(&m.outboard) {
                let p = body.pose.position;
                body.angvel = in_w + spin;
                body.linvel = in_v + in_w.cross(p - in_pose.position) + spin.cross(p - frame.position);
            }
        }
    }
}

pub fn pose_of(bodies: &BTreeMap<LinkId, BodyState>, link: Option<LinkId>) -> Transform {
    link.and_then(|l| bodies.get(&l))
        .map(|b| b.pose)
        .unwrap_or(Transform::IDENTITY)
}
