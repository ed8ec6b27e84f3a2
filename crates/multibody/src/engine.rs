use crate::config::MultibodyConfig;
use crate::coupling::{CouplingId, GearCoupling};
use crate::tree::{BodyState, Mobilizer, MobilizerId, Tree, pose_of};
use glam::DVec3;
use mechspace_common::{LinkId, SpatialForce};
use mechspace_joint::{PhysicsEngine, Reaction};
use mechspace_kernel::World;
use std::collections::BTreeMap;

/// Projection passes over the gear couplings per step.
const GEAR_PASSES: usize = 4;

/// Per-step integrator statistics for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    pub bodies: usize,
    pub mobilizers: usize,
    pub couplings: usize,
    pub locked: usize,
}

/// Reduced-coordinate world: links hang off a forest of revolute
/// mobilizers and move only through their joint coordinates.
#[derive(Debug, Default)]
pub struct MultibodyEngine {
    config: MultibodyConfig,
    tree: Tree,
    bodies: BTreeMap<LinkId, BodyState>,
    couplings: BTreeMap<CouplingId, GearCoupling>,
    next_coupling: u64,
    stats: StepStats,
}

impl MultibodyEngine {
    pub fn new(config: MultibodyConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &MultibodyConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    pub fn bodies(&self) -> &BTreeMap<LinkId, BodyState> {
        &self.bodies
    }

    pub fn body(&self, id: LinkId) -> Option<&BodyState> {
        self.bodies.get(&id)
    }

    /// Mirror every kernel link, dropping bodies whose link is gone.
    /// Rates survive; poses and mass properties come from the kernel.
    pub fn sync(&mut self, world: &World) {
        self.bodies.retain(|id, _| world.link(*id).is_some());
        for (id, link) in world.links() {
            self.bodies
                .entry(*id)
                .and_modify(|b| b.refresh(link))
                .or_insert_with(|| BodyState::from_link(link));
        }
    }

    pub fn mobilizer(&self, id: MobilizerId) -> Option<&Mobilizer> {
        self.tree.get(id)
    }

    pub fn mobilizer_mut(&mut self, id: MobilizerId) -> Option<&mut Mobilizer> {
        self.tree.get_mut(id)
    }

    pub fn add_mobilizer(&mut self, mobilizer: Mobilizer) -> MobilizerId {
        let name = mobilizer.name.clone();
        let reversed = mobilizer.sign < 0.0;
        let id = self.tree.insert(mobilizer);
        tracing::debug!(joint = %name, ?id, reversed, "mobilizer added");
        id
    }

    pub fn coupling(&self, id: CouplingId) -> Option<&GearCoupling> {
        self.couplings.get(&id)
    }

    pub fn coupling_mut(&mut self, id: CouplingId) -> Option<&mut GearCoupling> {
        self.couplings.get_mut(&id)
    }

    pub fn add_coupling(&mut self, coupling: GearCoupling) -> CouplingId {
        self.next_coupling += 1;
        let id = CouplingId(self.next_coupling);
        tracing::debug!(joint = %coupling.name, ?id, "gear coupling added");
        self.couplings.insert(id, coupling);
        id
    }

    pub fn remove_coupling(&mut self, id: CouplingId) -> Option<GearCoupling> {
        let coupling = self.couplings.remove(&id);
        if let Some(c) = &coupling {
            tracing::debug!(joint = %c.name, ?id, "gear coupling removed");
        }
        coupling
    }

    pub fn angular_velocity(&self, link: Option<LinkId>) -> DVec3 {
        self.tree.angular_velocity(&self.bodies, link)
    }

    /// Wrench the mobilizer transmits to its outboard subtree, torque about
    /// the joint anchor. Computed from the last step's accelerations.
    pub fn mobilizer_reaction(&self, id: MobilizerId, gravity: DVec3) -> Option<Reaction> {
        let m = self.tree.get(id)?;
        let anchor = m.frame(pose_of(&self.bodies, m.inboard)).position;
        let mut force = DVec3::ZERO;
        let mut torque = DVec3::ZERO;
        for link in self.tree.subtree(id) {
            let Some(b) = self.bodies.get(link) else {
                continue;
            };
            let f = b.mass * (b.linacc - gravity);
            let inertia = b.inertia_world();
            force += f;
            torque += (b.pose.position - anchor).cross(f)
                + inertia * b.angacc
                + b.angvel.cross(inertia * b.angvel);
        }
        let outboard = SpatialForce::new(torque, force);
        Some(Reaction {
            inboard: -outboard,
            outboard,
        })
    }

    /// Coupling torques from the impulse applied during the last step:
    /// inboard is the parent side, outboard the child side.
    pub fn coupling_reaction(&self, id: CouplingId, dt: f64) -> Option<Reaction> {
        let gear = self.couplings.get(&id)?;
        let frame = pose_of(&self.bodies, gear.reference);
        let scale = if dt > 0.0 { gear.impulse / dt } else { 0.0 };
        Some(Reaction {
            inboard: SpatialForce::new(-gear.ratio * gear.world_axis(frame, 0) * scale, DVec3::ZERO),
            outboard: SpatialForce::new(gear.world_axis(frame, 1) * scale, DVec3::ZERO),
        })
    }

    /// Effective inertia and gravity torque of a mobilizer's subtree about
    /// an axis through `anchor`.
    fn subtree_about(&self, id: MobilizerId, anchor: DVec3, axis: DVec3, gravity: DVec3) -> (f64, f64) {
        let mut inertia = 0.0;
        let mut torque = 0.0;
        for link in self.tree.subtree(id) {
            let Some(b) = self.bodies.get(link) else {
                continue;
            };
            let r = b.pose.position - anchor;
            inertia += axis.dot(b.inertia_world() * axis) + b.mass * axis.cross(r).length_squared();
            torque += axis.dot(r.cross(gravity * b.mass));
        }
        (inertia, torque)
    }

    /// Generalized forces carried by gear axes, mapped onto the mobilizers
    /// that move the geared links.
    fn gear_forces(&self) -> BTreeMap<MobilizerId, f64> {
        let mut forces = BTreeMap::new();
        for gear in self.couplings.values() {
            let frame = pose_of(&self.bodies, gear.reference);
            let omega_ref = self.angular_velocity(gear.reference);
            for (index, (mob, link)) in [(gear.driver, gear.parent), (gear.driven, gear.child)]
                .into_iter()
                .enumerate()
            {
                let Some(id) = mob else {
                    continue;
                };
                let Some(m) = self.tree.get(id) else {
                    continue;
                };
                let axis = gear.world_axis(frame, index);
                let spring = gear.springs[index];
                let theta = gear.angle(frame, pose_of(&self.bodies, link).rotation, index);
                let rate = axis.dot(self.angular_velocity(link) - omega_ref);
                let torque = gear.effort[index]
                    - spring.stiffness * (theta - spring.reference)
                    - spring.damping * rate;
                if torque != 0.0 {
                    let h = m.world_axis(pose_of(&self.bodies, m.inboard));
                    *forces.entry(id).or_insert(0.0) += torque * axis.dot(h);
                }
            }
        }
        forces
    }

    /// Velocity update for every mobilizer. Returns the number of locked
    /// mobilizers.
    fn accelerate(&mut self, gravity: DVec3, dt: f64) -> usize {
        let gear_forces = self.gear_forces();
        let order = self.tree.order().to_vec();
        let mut locked_count = 0;
        for id in order {
            let Some(m) = self.tree.get(id) else {
                continue;
            };
            let locked = self.bodies.get(&m.outboard).is_none_or(|b| b.locked);
            let frame = m.frame(pose_of(&self.bodies, m.inboard));
            let axis = frame.rotation * m.axis;
            let (inertia, gravity_torque) = self.subtree_about(id, frame.position, axis, gravity);
            let mut generalized = gravity_torque + gear_forces.get(&id).copied().unwrap_or(0.0);
            let mut friction = 0.0;
            if !m.released {
                let joint_torque = m.limit.clamp_effort(m.effort)
                    - m.spring.stiffness * (m.angle() - m.spring.reference)
                    - m.spring.damping * m.rate();
                generalized += m.sign * joint_torque;
                friction = m.friction;
            }

            let Some(m) = self.tree.get_mut(id) else {
                continue;
            };
            m.inertia = inertia;
            if locked || inertia <= f64::EPSILON {
                m.u = 0.0;
                m.udot = 0.0;
                locked_count += 1;
                continue;
            }
            m.udot = generalized / inertia;
            m.u += m.udot * dt;
            if friction > 0.0 {
                let slip = friction * dt / inertia;
                m.u = if m.u.abs() <= slip {
                    0.0
                } else {
                    m.u - slip * m.u.signum()
                };
            }
        }
        locked_count
    }

    fn project_couplings(&mut self) {
        for gear in self.couplings.values_mut() {
            gear.impulse = 0.0;
        }
        for _ in 0..GEAR_PASSES {
            for gear in self.couplings.values_mut() {
                project(&mut self.tree, &self.bodies, gear);
            }
        }
    }

    fn advance_positions(&mut self, dt: f64) {
        let enforce_velocity = self.config.enforce_velocity_limits;
        for (_, m) in self.tree.iter_mut() {
            if m.released {
                m.q += m.u * dt;
                continue;
            }
            let vmax = m.limit.velocity;
            if enforce_velocity && vmax.is_finite() && vmax >= 0.0 {
                m.u = m.u.clamp(-vmax, vmax);
            }
            m.q += m.u * dt;
            let theta = m.angle();
            if theta < m.limit.lower {
                m.q = m.sign * m.limit.lower;
                if m.rate() < 0.0 {
                    m.u = 0.0;
                }
            } else if theta > m.limit.upper {
                m.q = m.sign * m.limit.upper;
                if m.rate() > 0.0 {
                    m.u = 0.0;
                }
            }
        }
    }
}

/// One projection of a gear coupling onto the rates of its mobilizers.
fn project(tree: &mut Tree, bodies: &BTreeMap<LinkId, BodyState>, gear: &mut GearCoupling) {
    let frame = pose_of(bodies, gear.reference);
    let a0 = gear.world_axis(frame, 0);
    let a1 = gear.world_axis(frame, 1);
    let omega_ref = tree.angular_velocity(bodies, gear.reference);
    let violation = a1.dot(tree.angular_velocity(bodies, gear.child) - omega_ref)
        - gear.ratio * a0.dot(tree.angular_velocity(bodies, gear.parent) - omega_ref);

    let mut rows = Vec::with_capacity(2);
    for id in [gear.driver, gear.driven].into_iter().flatten() {
        let Some(m) = tree.get(id) else {
            continue;
        };
        if m.inertia <= f64::EPSILON || bodies.get(&m.outboard).is_none_or(|b| b.locked) {
            continue;
        }
        let h = m.world_axis(pose_of(bodies, m.inboard));
        let carries = |link: Option<LinkId>| {
            if link.is_some_and(|l| tree.is_ancestor(m.outboard, l)) {
                1.0
            } else {
                0.0
            }
        };
        let on_ref = carries(gear.reference);
        let jacobian = a1.dot(h) * (carries(gear.child) - on_ref)
            - gear.ratio * a0.dot(h) * (carries(gear.parent) - on_ref);
        if jacobian != 0.0 {
            rows.push((id, jacobian, m.inertia));
        }
    }
    let k: f64 = rows.iter().map(|(_, j, i)| j * j / i).sum();
    if k <= f64::EPSILON {
        return;
    }
    let lambda = -violation / k;
    for (id, j, i) in rows {
        if let Some(m) = tree.get_mut(id) {
            m.u += j * lambda / i;
        }
    }
    gear.impulse += lambda;
}

impl PhysicsEngine for MultibodyEngine {
    const NAME: &'static str = "multibody";

    fn step(&mut self, world: &mut World) {
        let _span = tracing::info_span!("multibody_solve", tick = world.tick()).entered();
        let dt = world.step_size();
        if dt <= 0.0 {
            return;
        }
        self.sync(world);
        let before: BTreeMap<LinkId, (DVec3, DVec3)> = self
            .bodies
            .iter()
            .map(|(id, b)| (*id, (b.linvel, b.angvel)))
            .collect();

        let locked = self.accelerate(world.gravity(), dt);
        self.project_couplings();
        self.advance_positions(dt);
        self.tree.place_bodies(&mut self.bodies);
        self.tree.propagate_velocities(&mut self.bodies);

        for (id, body) in self.bodies.iter_mut() {
            let (v0, w0) = before.get(id).copied().unwrap_or((body.linvel, body.angvel));
            body.linacc = (body.linvel - v0) / dt;
            body.angacc = (body.angvel - w0) / dt;
        }
        for id in self.tree.order() {
            if let Some(m) = self.tree.get(*id) {
                if let Some(body) = self.bodies.get(&m.outboard) {
                    world.integrate_link_pose(m.outboard, body.pose);
                }
            }
        }
        for (_, m) in self.tree.iter_mut() {
            m.effort = 0.0;
        }
        for gear in self.couplings.values_mut() {
            gear.effort = [0.0; 2];
        }

        self.stats = StepStats {
            bodies: self.bodies.len(),
            mobilizers: self.tree.len(),
            couplings: self.couplings.len(),
            locked,
        };
        tracing::trace!(stats = ?self.stats, "multibody step");
    }
}
