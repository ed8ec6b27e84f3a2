//! Native constraints and their impulse rows.

use crate::body::Bodies;
use glam::{DQuat, DVec3};
use mechspace_common::{LinkId, SpatialForce, Transform};
use mechspace_joint::frame::twist_angle;
use mechspace_joint::{AxisLimit, Reaction, SpringDamper};

/// Handle of a native constraint inside [`crate::MaximalEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeJointId(pub u64);

/// Point-on-line hinge. Anchors and axes are stored in each body's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HingeGeometry {
    pub anchor1: DVec3,
    pub anchor2: DVec3,
    pub axis1: DVec3,
    pub axis2: DVec3,
    /// Relative orientation `q1⁻¹ q2` at zero angle.
    pub rel0: DQuat,
}

/// Gear coupling. Axes are stored in the reference body's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearGeometry {
    pub ratio: f64,
    pub reference: Option<LinkId>,
    /// Reference pose the axes were derived from.
    pub frame: Transform,
    pub axes: [DVec3; 2],
    /// Orientation of body1/body2 relative to the reference at zero angle.
    pub rel0: [DQuat; 2],
}

impl GearGeometry {
    /// Derive the coupling from world-frame axes and current poses.
    pub fn derive(
        ratio: f64,
        reference: Option<LinkId>,
        frame: Transform,
        world_axes: [DVec3; 2],
        body_rotations: [DQuat; 2],
    ) -> Self {
        let inv = frame.rotation.inverse();
        Self {
            ratio,
            reference,
            frame,
            axes: world_axes.map(|a| (inv * a).normalize()),
            rel0: body_rotations.map(|q| inv * q),
        }
    }

    pub fn world_axis(&self, reference_rotation: DQuat, index: usize) -> DVec3 {
        reference_rotation * self.axes[index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeKind {
    Hinge(HingeGeometry),
    Gearbox(GearGeometry),
}

/// Impulses accumulated over one step's iterations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Accumulated {
    point: [f64; 3],
    angular: [f64; 2],
    friction: f64,
    limit: f64,
    gear: f64,
}

#[derive(Debug, Clone)]
pub struct NativeJoint {
    pub name: String,
    pub body1: Option<LinkId>,
    pub body2: Option<LinkId>,
    pub kind: NativeKind,
    /// Actuation for the next step; cleared after it.
    pub effort: [f64; 2],
    pub springs: [SpringDamper; 2],
    pub friction: [f64; 2],
    pub limits: [AxisLimit; 2],
    /// Reaction measured during the last step.
    pub feedback: Reaction,
    acc: Accumulated,
}

/// Per-step quantities fixed before the iterations start.
#[derive(Debug, Clone, Copy)]
pub enum Prepared {
    Hinge {
        r1: DVec3,
        r2: DVec3,
        separation: DVec3,
        axis: DVec3,
        basis: [DVec3; 2],
        misalignment: [f64; 2],
        limit: LimitState,
    },
    Gear {
        axes: [DVec3; 2],
        ratio: f64,
        reference: Option<LinkId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitState {
    Free,
    /// Penetration below the lower bound (negative).
    Lower(f64),
    /// Penetration above the upper bound (positive).
    Upper(f64),
}

impl LimitState {
    fn of(angle: f64, limit: &AxisLimit) -> Self {
        if !limit.has_position_limits() {
            Self::Free
        } else if angle <= limit.lower {
            Self::Lower(angle - limit.lower)
        } else if angle >= limit.upper {
            Self::Upper(angle - limit.upper)
        } else {
            Self::Free
        }
    }
}

/// One body's share of a constraint row.
struct Term {
    body: Option<LinkId>,
    linear: DVec3,
    angular: DVec3,
}

/// Solve one scalar row and return the applied impulse.
///
/// `total` is the impulse accumulated so far this step; it is clamped to
/// `[lo, hi]`.
fn solve_row(bodies: &mut Bodies, terms: &[Term], bias: f64, total: &mut f64, lo: f64, hi: f64) -> f64 {
    let mut cdot = 0.0;
    let mut k = 0.0;
    for t in terms {
        let (v, w) = bodies.velocity(t.body);
        cdot += t.linear.dot(v) + t.angular.dot(w);
        k += bodies.inv_mass(t.body) * t.linear.length_squared()
            + t.angular.dot(bodies.inv_inertia(t.body) * t.angular);
    }
    if k <= f64::EPSILON {
        return 0.0;
    }
    let old = *total;
    *total = (old - (cdot + bias) / k).clamp(lo, hi);
    let delta = *total - old;
    for t in terms {
        bodies.apply_impulse(t.body, t.linear * delta, t.angular * delta);
    }
    delta
}

impl NativeJoint {
    pub fn new(name: &str, body1: Option<LinkId>, body2: Option<LinkId>, kind: NativeKind) -> Self {
        Self {
            name: name.to_owned(),
            body1,
            body2,
            kind,
            effort: [0.0; 2],
            springs: [SpringDamper::default(); 2],
            friction: [0.0; 2],
            limits: [AxisLimit::default(); 2],
            feedback: Reaction::default(),
            acc: Accumulated::default(),
        }
    }

    /// Axis `index` in world coordinates.
    pub fn world_axis(&self, bodies: &Bodies, index: usize) -> DVec3 {
        match &self.kind {
            NativeKind::Hinge(h) => bodies.pose(self.body1).rotation * h.axis1,
            NativeKind::Gearbox(g) => g.world_axis(bodies.pose(g.reference).rotation, index),
        }
    }

    /// Body driven by axis `index`, and the body it turns relative to.
    pub fn axis_bodies(&self, index: usize) -> (Option<LinkId>, Option<LinkId>) {
        match &self.kind {
            NativeKind::Hinge(_) => (self.body2, self.body1),
            NativeKind::Gearbox(g) => {
                let driven = if index == 0 { self.body1 } else { self.body2 };
                (driven, g.reference)
            }
        }
    }

    pub fn angle(&self, bodies: &Bodies, index: usize) -> f64 {
        match &self.kind {
            NativeKind::Hinge(h) => {
                let q1 = bodies.pose(self.body1).rotation;
                let q2 = bodies.pose(self.body2).rotation;
                twist_angle(q1.inverse() * q2, h.rel0, h.axis1)
            }
            NativeKind::Gearbox(g) => {
                let (driven, reference) = self.axis_bodies(index);
                let q_ref = bodies.pose(reference).rotation;
                let q = bodies.pose(driven).rotation;
                twist_angle(q_ref.inverse() * q, g.rel0[index], g.axes[index])
            }
        }
    }

    pub fn velocity(&self, bodies: &Bodies, index: usize) -> f64 {
        let (driven, reference) = self.axis_bodies(index);
        let w = bodies.velocity(driven).1 - bodies.velocity(reference).1;
        self.world_axis(bodies, index).dot(w)
    }

    fn axis_count(&self) -> usize {
        match self.kind {
            NativeKind::Hinge(_) => 1,
            NativeKind::Gearbox(_) => 2,
        }
    }

    /// Apply actuation, springs and dampers as explicit torques, then clear
    /// the actuation.
    pub fn apply_explicit(&mut self, bodies: &mut Bodies, dt: f64) {
        for index in 0..self.axis_count() {
            let spring = self.springs[index];
            let angle = self.angle(bodies, index);
            let rate = self.velocity(bodies, index);
            let torque = self.limits[index].clamp_effort(self.effort[index])
                - spring.stiffness * (angle - spring.reference)
                - spring.damping * rate;
            if torque == 0.0 {
                continue;
            }
            let axis = self.world_axis(bodies, index);
            let (driven, reference) = self.axis_bodies(index);
            bodies.apply_impulse(driven, DVec3::ZERO, axis * torque * dt);
            bodies.apply_impulse(reference, DVec3::ZERO, -axis * torque * dt);
        }
        self.effort = [0.0; 2];
    }

    pub fn prepare(&mut self, bodies: &Bodies) -> Prepared {
        self.acc = Accumulated::default();
        match &self.kind {
            NativeKind::Hinge(h) => {
                let x1 = bodies.pose(self.body1);
                let x2 = bodies.pose(self.body2);
                let p1 = x1.transform_point(h.anchor1);
                let p2 = x2.transform_point(h.anchor2);
                let axis = x1.rotation * h.axis1;
                let axis2 = x2.rotation * h.axis2;
                let (b, c) = axis.any_orthonormal_pair();
                let err = axis.cross(axis2);
                Prepared::Hinge {
                    r1: p1 - x1.position,
                    r2: p2 - x2.position,
                    separation: p2 - p1,
                    axis,
                    basis: [b, c],
                    misalignment: [b.dot(err), c.dot(err)],
                    limit: LimitState::of(self.angle(bodies, 0), &self.limits[0]),
                }
            }
            NativeKind::Gearbox(g) => Prepared::Gear {
                axes: [self.world_axis(bodies, 0), self.world_axis(bodies, 1)],
                ratio: g.ratio,
                reference: g.reference,
            },
        }
    }

    /// One sequential-impulse pass over this joint's rows.
    pub fn solve(&mut self, bodies: &mut Bodies, prepared: &Prepared, dt: f64, erp: f64) {
        let (b1, b2) = (self.body1, self.body2);
        let stiff = erp / dt;
        match *prepared {
            Prepared::Hinge {
                r1,
                r2,
                separation,
                axis,
                basis,
                misalignment,
                limit,
            } => {
                for (k, e) in DVec3::AXES.into_iter().enumerate() {
                    let terms = [
                        Term { body: b1, linear: -e, angular: -r1.cross(e) },
                        Term { body: b2, linear: e, angular: r2.cross(e) },
                    ];
                    let bias = stiff * e.dot(separation);
                    solve_row(bodies, &terms, bias, &mut self.acc.point[k], f64::NEG_INFINITY, f64::INFINITY);
                }
                for (i, d) in basis.into_iter().enumerate() {
                    let terms = [
                        Term { body: b1, linear: DVec3::ZERO, angular: -d },
                        Term { body: b2, linear: DVec3::ZERO, angular: d },
                    ];
                    let bias = stiff * misalignment[i];
                    solve_row(bodies, &terms, bias, &mut self.acc.angular[i], f64::NEG_INFINITY, f64::INFINITY);
                }
                let twist = [
                    Term { body: b1, linear: DVec3::ZERO, angular: -axis },
                    Term { body: b2, linear: DVec3::ZERO, angular: axis },
                ];
                if self.friction[0] > 0.0 {
                    let bound = self.friction[0] * dt;
                    solve_row(bodies, &twist, 0.0, &mut self.acc.friction, -bound, bound);
                }
                match limit {
                    LimitState::Free => {}
                    LimitState::Lower(c) => {
                        solve_row(bodies, &twist, stiff * c, &mut self.acc.limit, 0.0, f64::INFINITY);
                    }
                    LimitState::Upper(c) => {
                        solve_row(bodies, &twist, stiff * c, &mut self.acc.limit, f64::NEG_INFINITY, 0.0);
                    }
                }
            }
            Prepared::Gear {
                axes: [a0, a1],
                ratio,
                reference,
            } => {
                let terms = [
                    Term { body: b1, linear: DVec3::ZERO, angular: -a0 * ratio },
                    Term { body: b2, linear: DVec3::ZERO, angular: a1 },
                    Term { body: reference, linear: DVec3::ZERO, angular: a0 * ratio - a1 },
                ];
                solve_row(bodies, &terms, 0.0, &mut self.acc.gear, f64::NEG_INFINITY, f64::INFINITY);
            }
        }
    }

    /// Turn the step's accumulated impulses into forces.
    ///
    /// Outboard is body2; torques are about the anchor.
    pub fn record_feedback(&mut self, prepared: &Prepared, dt: f64) {
        let acc = self.acc;
        self.feedback = match *prepared {
            Prepared::Hinge { axis, basis, .. } => {
                let force = DVec3::AXES
                    .into_iter()
                    .zip(acc.point)
                    .map(|(e, l)| e * l)
                    .sum::<DVec3>();
                let torque = basis[0] * acc.angular[0]
                    + basis[1] * acc.angular[1]
                    + axis * (acc.friction + acc.limit);
                let outboard = SpatialForce::new(torque / dt, force / dt);
                Reaction {
                    inboard: -outboard,
                    outboard,
                }
            }
            Prepared::Gear {
                axes: [a0, a1],
                ratio,
                ..
            } => Reaction {
                inboard: SpatialForce::new(-a0 * ratio * acc.gear / dt, DVec3::ZERO),
                outboard: SpatialForce::new(a1 * acc.gear / dt, DVec3::ZERO),
            },
        };
    }
}
