use glam::DVec3;
use mechspace_common::{LinkId, ModelId, Transform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clock and gravity settings for a world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Simulated seconds per step.
    pub step_size: f64,
    pub gravity: DVec3,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            step_size: 0.001,
            gravity: DVec3::new(0.0, 0.0, -9.81),
        }
    }
}

/// An event record produced by every mutation to the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorldEvent {
    ModelSpawned { id: ModelId, name: String },
    LinkSpawned { id: LinkId, model: ModelId, pose: Transform },
    LinkDespawned { id: LinkId },
    /// Pose changed through an explicit operation (not through a solve).
    LinkMoved { id: LinkId, old: Transform, new: Transform },
    EnabledChanged { id: LinkId, enabled: bool },
    /// Clock advanced one step.
    Stepped { tick: u64, sim_time: f64 },
}

/// A named group of links with a world pose of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub pose: Transform,
}

/// A rigid body. Poses are world poses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub model: ModelId,
    pub pose: Transform,
    /// Sleep flag: disabled links are skipped by back-ends that support it.
    pub enabled: bool,
    /// Kinematic links are never moved by a solve.
    pub kinematic: bool,
    pub mass: f64,
    /// Principal moments of inertia in the link frame.
    pub inertia: DVec3,
}

impl Link {
    /// A dynamic link of the given mass with a unit-cube inertia.
    pub fn new(name: impl Into<String>, model: ModelId, pose: Transform, mass: f64) -> Self {
        Self {
            name: name.into(),
            model,
            pose,
            enabled: true,
            kinematic: false,
            mass,
            inertia: DVec3::splat(mass / 6.0),
        }
    }

    pub fn with_inertia(mut self, inertia: DVec3) -> Self {
        self.inertia = inertia;
        self
    }

    pub fn kinematic(mut self) -> Self {
        self.kinematic = true;
        self
    }
}

/// The Model/World arena that owns every link.
///
/// Joints and back-ends hold `LinkId`s into this arena and resolve them per
/// access. BTreeMap keeps iteration deterministic across platforms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    config: WorldConfig,
    models: BTreeMap<ModelId, Model>,
    links: BTreeMap<LinkId, Link>,
    next_id: u64,
    tick: u64,
    sim_time: f64,
    /// Append-only event log of all mutations.
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Monotonic simulation time in seconds.
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn step_size(&self) -> f64 {
        self.config.step_size
    }

    pub fn gravity(&self) -> DVec3 {
        self.config.gravity
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    pub fn links(&self) -> &BTreeMap<LinkId, Link> {
        &self.links
    }

    pub fn models(&self) -> &BTreeMap<ModelId, Model> {
        &self.models
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn spawn_model(&mut self, name: impl Into<String>, pose: Transform) -> ModelId {
        let id = ModelId(self.allocate());
        let name = name.into();
        self.event_log.push(WorldEvent::ModelSpawned {
            id,
            name: name.clone(),
        });
        self.models.insert(id, Model { name, pose });
        id
    }

    /// Add a link. Returns `None` if the link's model does not exist.
    pub fn spawn_link(&mut self, link: Link) -> Option<LinkId> {
        if !self.models.contains_key(&link.model) {
            tracing::warn!(link = %link.name, "spawn_link: unknown model");
            return None;
        }
        let id = LinkId(self.allocate());
        self.event_log.push(WorldEvent::LinkSpawned {
            id,
            model: link.model,
            pose: link.pose,
        });
        self.links.insert(id, link);
        Some(id)
    }

    /// Remove a link. Its id never resolves again.
    pub fn despawn_link(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.remove(&id);
        if link.is_some() {
            self.event_log.push(WorldEvent::LinkDespawned { id });
        }
        link
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(&id)
    }

    pub fn model_by_name(&self, name: &str) -> Option<ModelId> {
        self.models
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| *id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    /// Find a link by name inside a model.
    pub fn link_by_name(&self, model: ModelId, name: &str) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, l)| l.model == model && l.name == name)
            .map(|(id, _)| *id)
    }

    /// World pose of a link, `None` if it no longer exists.
    pub fn link_pose(&self, id: LinkId) -> Option<Transform> {
        self.links.get(&id).map(|l| l.pose)
    }

    /// Explicitly move a link and log the change.
    pub fn set_link_pose(&mut self, id: LinkId, new: Transform) -> bool {
        if let Some(link) = self.links.get_mut(&id) {
            let old = link.pose;
            link.pose = new;
            self.event_log.push(WorldEvent::LinkMoved { id, old, new });
            true
        } else {
            false
        }
    }

    /// Write a pose computed by a solve. Not logged.
    pub fn integrate_link_pose(&mut self, id: LinkId, pose: Transform) {
        if let Some(link) = self.links.get_mut(&id) {
            link.pose = pose;
        }
    }

    /// Enable (wake) or disable (sleep) a link. Only changes are logged.
    pub fn set_enabled(&mut self, id: LinkId, enabled: bool) -> bool {
        let Some(link) = self.links.get_mut(&id) else {
            return false;
        };
        if link.enabled != enabled {
            link.enabled = enabled;
            self.event_log
                .push(WorldEvent::EnabledChanged { id, enabled });
        }
        true
    }

    /// Advance the clock by one step.
    pub fn advance(&mut self) {
        self.tick += 1;
        self.sim_time = self.tick as f64 * self.config.step_size;
        self.event_log.push(WorldEvent::Stepped {
            tick: self.tick,
            sim_time: self.sim_time,
        });
    }
}
