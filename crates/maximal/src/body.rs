use glam::{DMat3, DVec3};
use mechspace_common::{LinkId, Transform};
use mechspace_kernel::{Link, World};
use std::collections::BTreeMap;

/// Solver-side state of one link.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub pose: Transform,
    pub linvel: DVec3,
    pub angvel: DVec3,
    inv_mass: f64,
    /// Inverse principal moments in the body frame.
    inv_inertia: DVec3,
    /// Consecutive steps spent below the sleep thresholds.
    pub idle_steps: u32,
}

impl Body {
    pub fn from_link(link: &Link) -> Self {
        let mut body = Self {
            pose: link.pose,
            linvel: DVec3::ZERO,
            angvel: DVec3::ZERO,
            inv_mass: 0.0,
            inv_inertia: DVec3::ZERO,
            idle_steps: 0,
        };
        body.refresh(link);
        body
    }

    /// Pick up pose and mass properties from the kernel link.
    ///
    /// Kinematic, disabled or massless links become static and lose their
    /// velocity.
    pub fn refresh(&mut self, link: &Link) {
        self.pose = link.pose;
        if link.kinematic || !link.enabled || link.mass <= 0.0 {
            self.inv_mass = 0.0;
            self.inv_inertia = DVec3::ZERO;
            self.linvel = DVec3::ZERO;
            self.angvel = DVec3::ZERO;
            return;
        }
        self.inv_mass = 1.0 / link.mass;
        let recip = |i: f64| if i > 0.0 { 1.0 / i } else { 0.0 };
        self.inv_inertia = DVec3::new(
            recip(link.inertia.x),
            recip(link.inertia.y),
            recip(link.inertia.z),
        );
    }

    pub fn is_dynamic(&self) -> bool {
        self.inv_mass > 0.0
    }

    pub fn inv_mass(&self) -> f64 {
        self.inv_mass
    }

    /// Inverse inertia tensor in world coordinates.
    pub fn inv_inertia_world(&self) -> DMat3 {
        let r = DMat3::from_quat(self.pose.rotation);
        r * DMat3::from_diagonal(self.inv_inertia) * r.transpose()
    }

    /// Apply a linear impulse at the centre of mass and an angular impulse.
    pub fn apply_impulse(&mut self, linear: DVec3, angular: DVec3) {
        if !self.is_dynamic() {
            return;
        }
        self.linvel += linear * self.inv_mass;
        self.angvel += self.inv_inertia_world() * angular;
    }
}

/// Body storage keyed by link. `None` stands for the static ground.
#[derive(Debug, Clone, Default)]
pub struct Bodies {
    bodies: BTreeMap<LinkId, Body>,
}

impl Bodies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn get(&self, id: LinkId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkId, &Body)> {
        self.bodies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&LinkId, &mut Body)> {
        self.bodies.iter_mut()
    }

    /// Mirror every kernel link, dropping bodies whose link is gone.
    pub fn sync(&mut self, world: &World) {
        self.bodies.retain(|id, _| world.link(*id).is_some());
        for (id, link) in world.links() {
            self.sync_link(*id, link);
        }
    }

    pub fn sync_link(&mut self, id: LinkId, link: &Link) {
        self.bodies
            .entry(id)
            .and_modify(|b| b.refresh(link))
            .or_insert_with(|| Body::from_link(link));
    }

    pub fn pose(&self, id: Option<LinkId>) -> Transform {
        id.and_then(|id| self.bodies.get(&id))
            .map(|b| b.pose)
            .unwrap_or(Transform::IDENTITY)
    }

    /// Linear and angular velocity.
    pub fn velocity(&self, id: Option<LinkId>) -> (DVec3, DVec3) {
        id.and_then(|id| self.bodies.get(&id))
            .map(|b| (b.linvel, b.angvel))
            .unwrap_or((DVec3::ZERO, DVec3::ZERO))
    }

    pub fn inv_mass(&self, id: Option<LinkId>) -> f64 {
        id.and_then(|id| self.bodies.get(&id))
            .map(Body::inv_mass)
            .unwrap_or(0.0)
    }

    pub fn inv_inertia(&self, id: Option<LinkId>) -> DMat3 {
        id.and_then(|id| self.bodies.get(&id))
            .map(Body::inv_inertia_world)
            .unwrap_or(DMat3::ZERO)
    }

    pub fn apply_impulse(&mut self, id: Option<LinkId>, linear: DVec3, angular: DVec3) {
        if let Some(body) = id.and_then(|id| self.bodies.get_mut(&id)) {
            body.apply_impulse(linear, angular);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DQuat;

    fn world_with(link: Link) -> (World, LinkId) {
        let mut w = World::new();
        let m = w.spawn_model("m", Transform::IDENTITY);
        let link = Link { model: m, ..link };
        let id = w.spawn_link(link).unwrap();
        (w, id)
    }

    #[test]
    fn kinematic_and_disabled_links_are_static() {
        let m = mechspace_common::ModelId(0);
        let kinematic = Body::from_link(&Link::new("k", m, Transform::IDENTITY, 3.0).kinematic());
        assert!(!kinematic.is_dynamic());

        let mut sleeping = Link::new("s", m, Transform::IDENTITY, 3.0);
        sleeping.enabled = false;
        assert!(!Body::from_link(&sleeping).is_dynamic());
        assert!(!Body::from_link(&Link::new("z", m, Transform::IDENTITY, 0.0)).is_dynamic());
    }

    #[test]
    fn impulse_respects_rotated_inertia() {
        let m = mechspace_common::ModelId(0);
        let link = Link::new(
            "rod",
            m,
            Transform::from_rotation(DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2)),
            2.0,
        )
        .with_inertia(DVec3::new(1.0, 4.0, 4.0));
        let mut body = Body::from_link(&link);
        // world X is the body's Y axis after the yaw
        body.apply_impulse(DVec3::X, DVec3::X);
        assert_relative_eq!(body.linvel.x, 0.5);
        assert_relative_eq!(body.angvel.x, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn sync_tracks_world() {
        let (mut w, id) = world_with(Link::new("a", mechspace_common::ModelId(0), Transform::IDENTITY, 1.0));
        let mut bodies = Bodies::new();
        bodies.sync(&w);
        assert_eq!(bodies.len(), 1);
        w.set_link_pose(id, Transform::from_position(DVec3::Z));
        bodies.sync(&w);
        assert_eq!(bodies.pose(Some(id)).position, DVec3::Z);
        w.despawn_link(id);
        bodies.sync(&w);
        assert!(bodies.is_empty());
        assert_eq!(bodies.pose(Some(id)), Transform::IDENTITY);
    }
}
