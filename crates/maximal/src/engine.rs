use crate::body::Bodies;
use crate::config::MaximalConfig;
use crate::constraint::{NativeJoint, NativeJointId};
use glam::DQuat;
use mechspace_common::Transform;
use mechspace_joint::PhysicsEngine;
use mechspace_kernel::World;
use std::collections::BTreeMap;

/// Per-step solver statistics for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    pub bodies: usize,
    pub dynamic_bodies: usize,
    pub joints: usize,
    pub put_to_sleep: usize,
}

/// Maximal-coordinate world: every link is a free body held together by
/// constraint impulses.
#[derive(Debug, Default)]
pub struct MaximalEngine {
    config: MaximalConfig,
    bodies: Bodies,
    joints: BTreeMap<NativeJointId, NativeJoint>,
    next_joint: u64,
    stats: StepStats,
}

impl MaximalEngine {
    pub fn new(config: MaximalConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &MaximalConfig {
        &self.config
    }

    pub fn bodies(&self) -> &Bodies {
        &self.bodies
    }

    pub fn bodies_mut(&mut self) -> &mut Bodies {
        &mut self.bodies
    }

    /// Refresh body state from the kernel outside a step.
    pub fn sync(&mut self, world: &World) {
        self.bodies.sync(world);
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn joint(&self, id: NativeJointId) -> Option<&NativeJoint> {
        self.joints.get(&id)
    }

    pub fn joint_mut(&mut self, id: NativeJointId) -> Option<&mut NativeJoint> {
        self.joints.get_mut(&id)
    }

    pub fn add_joint(&mut self, joint: NativeJoint) -> NativeJointId {
        self.next_joint += 1;
        let id = NativeJointId(self.next_joint);
        tracing::debug!(joint = %joint.name, ?id, "native joint created");
        self.joints.insert(id, joint);
        id
    }

    pub fn remove_joint(&mut self, id: NativeJointId) -> Option<NativeJoint> {
        let joint = self.joints.remove(&id);
        if let Some(j) = &joint {
            tracing::debug!(joint = %j.name, ?id, "native joint removed");
        }
        joint
    }

    fn integrate(&mut self, world: &mut World, dt: f64) {
        for (id, body) in self.bodies.iter_mut() {
            if !body.is_dynamic() {
                continue;
            }
            let rotation = (DQuat::from_scaled_axis(body.angvel * dt) * body.pose.rotation).normalize();
            body.pose = Transform::new(body.pose.position + body.linvel * dt, rotation);
            world.integrate_link_pose(*id, body.pose);
        }
    }

    fn auto_disable(&mut self, world: &mut World) -> usize {
        let cfg = self.config;
        let mut asleep = 0;
        for (id, body) in self.bodies.iter_mut() {
            if !body.is_dynamic() {
                continue;
            }
            if body.linvel.length() < cfg.sleep_linear_threshold
                && body.angvel.length() < cfg.sleep_angular_threshold
            {
                body.idle_steps += 1;
            } else {
                body.idle_steps = 0;
            }
            if body.idle_steps >= cfg.sleep_steps {
                body.idle_steps = 0;
                world.set_enabled(*id, false);
                asleep += 1;
            }
        }
        asleep
    }
}

impl PhysicsEngine for MaximalEngine {
    const NAME: &'static str = "maximal";

    fn step(&mut self, world: &mut World) {
        let _span = tracing::info_span!("maximal_solve", tick = world.tick()).entered();
        let dt = world.step_size();
        let gravity = world.gravity();
        self.bodies.sync(world);

        for (_, body) in self.bodies.iter_mut() {
            if body.is_dynamic() {
                body.linvel += gravity * dt;
            }
        }
        for joint in self.joints.values_mut() {
            joint.apply_explicit(&mut self.bodies, dt);
        }

        let mut prepared: Vec<_> = self
            .joints
            .iter_mut()
            .map(|(id, joint)| (*id, joint.prepare(&self.bodies)))
            .collect();
        for _ in 0..self.config.iterations {
            for (id, rows) in &prepared {
                if let Some(joint) = self.joints.get_mut(id) {
                    joint.solve(&mut self.bodies, rows, dt, self.config.erp);
                }
            }
        }
        for (id, rows) in prepared.drain(..) {
            if let Some(joint) = self.joints.get_mut(&id) {
                joint.record_feedback(&rows, dt);
            }
        }

        self.integrate(world, dt);
        let put_to_sleep = if self.config.auto_disable {
            self.auto_disable(world)
        } else {
            0
        };
        self.stats = StepStats {
            bodies: self.bodies.len(),
            dynamic_bodies: self.bodies.iter().filter(|(_, b)| b.is_dynamic()).count(),
            joints: self.joints.len(),
            put_to_sleep,
        };
        tracing::trace!(stats = ?self.stats, "maximal step");
    }
}
