//! Declarative joint descriptions.
//!
//! `JointDescription` is the canonical form a mechanism loader hands to a
//! joint. The deprecated document form (a loosely typed JSON tree with the
//! older field layout) is converted here before reaching `load`.

use crate::error::LoadError;
use glam::{DQuat, DVec3, EulerRot};
use mechspace_common::Transform;
use serde::{Deserialize, Serialize};

/// Name used for "no link, the world frame" in descriptions.
pub const WORLD_FRAME: &str = "world";

/// Joint kinds with a dedicated specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Hinge,
    Gearbox,
}

impl JointKind {
    /// Fixed number of axes for this kind.
    pub fn angle_count(self) -> usize {
        match self {
            JointKind::Hinge => 1,
            JointKind::Gearbox => 2,
        }
    }
}

/// Position, effort and velocity bounds of one axis.
///
/// A negative or non-finite `effort`/`velocity` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisLimit {
    pub lower: f64,
    pub upper: f64,
    pub effort: f64,
    pub velocity: f64,
}

impl Default for AxisLimit {
    fn default() -> Self {
        Self {
            lower: -1e16,
            upper: 1e16,
            effort: -1.0,
            velocity: -1.0,
        }
    }
}

impl AxisLimit {
    pub fn effort_limit(&self) -> Option<f64> {
        (self.effort >= 0.0 && self.effort.is_finite()).then_some(self.effort)
    }

    pub fn velocity_limit(&self) -> Option<f64> {
        (self.velocity >= 0.0 && self.velocity.is_finite()).then_some(self.velocity)
    }

    /// Truncate an effort to `[-effort, effort]` when the axis is limited.
    pub fn clamp_effort(&self, value: f64) -> f64 {
        match self.effort_limit() {
            Some(max) => value.clamp(-max, max),
            None => value,
        }
    }

    /// Whether the position bounds are narrow enough to matter.
    pub fn has_position_limits(&self) -> bool {
        self.lower > -1e15 || self.upper < 1e15
    }
}

/// One axis of a joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisDescription {
    /// Axis direction. Hinge axes are in the joint model's frame, gearbox
    /// axes in the parent link's model frame.
    pub direction: DVec3,
    pub damping: f64,
    pub friction: f64,
    pub stiffness: f64,
    pub spring_reference: f64,
    pub limit: AxisLimit,
}

impl Default for AxisDescription {
    fn default() -> Self {
        Self {
            direction: DVec3::Z,
            damping: 0.0,
            friction: 0.0,
            stiffness: 0.0,
            spring_reference: 0.0,
            limit: AxisLimit::default(),
        }
    }
}

impl AxisDescription {
    pub fn new(direction: DVec3) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }

    pub fn with_effort_limit(mut self, effort: f64) -> Self {
        self.limit.effort = effort;
        self
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.limit.lower = lower;
        self.limit.upper = upper;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }
}

/// Immutable-once-produced joint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDescription {
    pub name: String,
    pub kind: JointKind,
    /// Name of the owning model.
    pub model: String,
    /// Parent link name; `None` or `"world"` for the world frame.
    #[serde(default)]
    pub parent: Option<String>,
    /// Child link name; `None` or `"world"` for the world frame.
    #[serde(default)]
    pub child: Option<String>,
    /// Pose of the joint frame relative to the child link frame.
    #[serde(default)]
    pub pose: Transform,
    pub axes: Vec<AxisDescription>,
    #[serde(default)]
    pub gear_ratio: Option<f64>,
    /// Link the gear coupling is defined relative to; the world when absent.
    #[serde(default)]
    pub gear_reference: Option<String>,
    /// Ask a tree-based back-end to break a kinematic loop at this joint.
    #[serde(default)]
    pub loop_break: bool,
}

impl JointDescription {
    pub fn hinge(
        name: impl Into<String>,
        model: impl Into<String>,
        parent: Option<&str>,
        child: Option<&str>,
        axis: AxisDescription,
    ) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Hinge,
            model: model.into(),
            parent: parent.map(str::to_owned),
            child: child.map(str::to_owned),
            pose: Transform::IDENTITY,
            axes: vec![axis],
            gear_ratio: None,
            gear_reference: None,
            loop_break: false,
        }
    }

    pub fn gearbox(
        name: impl Into<String>,
        model: impl Into<String>,
        parent: &str,
        child: &str,
        axes: [AxisDescription; 2],
        ratio: f64,
        reference: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Gearbox,
            model: model.into(),
            parent: Some(parent.to_owned()),
            child: Some(child.to_owned()),
            pose: Transform::IDENTITY,
            axes: axes.to_vec(),
            gear_ratio: Some(ratio),
            gear_reference: reference.map(str::to_owned),
            loop_break: false,
        }
    }

    pub fn with_pose(mut self, pose: Transform) -> Self {
        self.pose = pose;
        self
    }

    /// Parent link name, `None` for the world frame.
    pub fn parent_link(&self) -> Option<&str> {
        endpoint(&self.parent)
    }

    /// Child link name, `None` for the world frame.
    pub fn child_link(&self) -> Option<&str> {
        endpoint(&self.child)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        let malformed = |reason: String| LoadError::Malformed {
            joint: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(malformed("empty joint name".into()));
        }
        if !(1..=2).contains(&self.axes.len()) {
            return Err(malformed(format!(
                "axis count {} outside 1..=2",
                self.axes.len()
            )));
        }
        if self.parent_link().is_none() && self.child_link().is_none() {
            return Err(malformed("both endpoints are the world frame".into()));
        }
        if !self.pose.position.is_finite() || !self.pose.rotation.is_finite() {
            return Err(malformed("non-finite pose".into()));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            if !axis.direction.is_finite() || axis.direction.length_squared() < 1e-12 {
                return Err(malformed(format!("axis {i} has no usable direction")));
            }
            if axis.limit.lower > axis.limit.upper {
                return Err(malformed(format!(
                    "axis {i} lower limit {} above upper limit {}",
                    axis.limit.lower, axis.limit.upper
                )));
            }
            for (field, value) in [
                ("damping", axis.damping),
                ("friction", axis.friction),
                ("stiffness", axis.stiffness),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(malformed(format!("axis {i} {field} is {value}")));
                }
            }
        }
        if let Some(ratio) = self.gear_ratio {
            if !ratio.is_finite() {
                return Err(malformed(format!("gear ratio is {ratio}")));
            }
        }
        Ok(())
    }

    /// Convert the deprecated document form into a canonical description.
    #[deprecated(note = "build a JointDescription and call load() directly")]
    pub fn from_document(model: &str, document: &serde_json::Value) -> Result<Self, LoadError> {
        let doc: LegacyJoint = serde_json::from_value(document.clone())?;
        doc.into_description(model)
    }
}

fn endpoint(name: &Option<String>) -> Option<&str> {
    name.as_deref().filter(|n| !n.is_empty() && *n != WORLD_FRAME)
}

#[derive(Debug, Deserialize)]
struct LegacyJoint {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    parent: String,
    child: String,
    /// x y z roll pitch yaw
    #[serde(default)]
    pose: [f64; 6],
    #[serde(default)]
    axis: Option<LegacyAxis>,
    #[serde(default)]
    axis2: Option<LegacyAxis>,
    #[serde(default)]
    gearbox_ratio: Option<f64>,
    #[serde(default)]
    gearbox_reference_body: Option<String>,
    #[serde(default)]
    physics: Option<LegacyPhysics>,
}

#[derive(Debug, Deserialize)]
struct LegacyAxis {
    xyz: [f64; 3],
    #[serde(default)]
    dynamics: LegacyDynamics,
    #[serde(default)]
    limit: AxisLimit,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyDynamics {
    damping: f64,
    friction: f64,
    spring_stiffness: f64,
    spring_reference: f64,
}

#[derive(Debug, Deserialize)]
struct LegacyPhysics {
    #[serde(default)]
    multibody: Option<LegacyMultibody>,
}

#[derive(Debug, Deserialize)]
struct LegacyMultibody {
    #[serde(default)]
    must_be_loop_joint: bool,
}

impl LegacyAxis {
    fn into_axis(self) -> AxisDescription {
        AxisDescription {
            direction: DVec3::from_array(self.xyz),
            damping: self.dynamics.damping,
            friction: self.dynamics.friction,
            stiffness: self.dynamics.spring_stiffness,
            spring_reference: self.dynamics.spring_reference,
            limit: self.limit,
        }
    }
}

impl LegacyJoint {
    fn into_description(self, model: &str) -> Result<JointDescription, LoadError> {
        let kind = match self.kind.as_str() {
            "revolute" | "hinge" => JointKind::Hinge,
            "gearbox" => JointKind::Gearbox,
            other => {
                return Err(LoadError::Malformed {
                    joint: self.name,
                    reason: format!("unsupported joint type '{other}'"),
                });
            }
        };
        let [x, y, z, roll, pitch, yaw] = self.pose;
        let pose = Transform::new(
            DVec3::new(x, y, z),
            DQuat::from_euler(EulerRot::ZYX, yaw, pitch, roll),
        );
        let axes = [self.axis, self.axis2]
            .into_iter()
            .flatten()
            .map(LegacyAxis::into_axis)
            .collect();
        let loop_break = self
            .physics
            .and_then(|p| p.multibody)
            .is_some_and(|m| m.must_be_loop_joint);

        Ok(JointDescription {
            name: self.name,
            kind,
            model: model.to_owned(),
            parent: Some(self.parent),
            child: Some(self.child),
            pose,
            axes,
            gear_ratio: self.gearbox_ratio,
            gear_reference: self.gearbox_reference_body,
            loop_break,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn valid_hinge() -> JointDescription {
        JointDescription::hinge(
            "elbow",
            "arm",
            Some("upper"),
            Some("lower"),
            AxisDescription::new(DVec3::Y),
        )
    }

    #[test]
    fn effort_limit_semantics() {
        let limited = AxisLimit {
            effort: 10.0,
            ..Default::default()
        };
        assert_eq!(limited.clamp_effort(25.0), 10.0);
        assert_eq!(limited.clamp_effort(-25.0), -10.0);
        assert_eq!(limited.clamp_effort(3.0), 3.0);
        assert_eq!(AxisLimit::default().effort_limit(), None);
        assert_eq!(AxisLimit::default().clamp_effort(1e9), 1e9);
    }

    #[test]
    fn world_endpoints_resolve_to_none() {
        let mut d = valid_hinge();
        d.parent = Some(WORLD_FRAME.into());
        assert_eq!(d.parent_link(), None);
        assert_eq!(d.child_link(), Some("lower"));
        d.child = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(valid_hinge().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_axes() {
        let mut d = valid_hinge();
        d.axes[0].direction = DVec3::ZERO;
        assert!(matches!(d.validate(), Err(LoadError::Malformed { .. })));

        let mut d = valid_hinge();
        d.axes[0].limit.lower = 1.0;
        d.axes[0].limit.upper = -1.0;
        assert!(d.validate().is_err());

        let mut d = valid_hinge();
        d.axes[0].damping = -0.5;
        assert!(d.validate().is_err());

        let mut d = valid_hinge();
        d.axes.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn canonical_form_deserializes() {
        let d: JointDescription = serde_json::from_value(json!({
            "name": "knee",
            "kind": "hinge",
            "model": "leg",
            "parent": "thigh",
            "child": "shin",
            "axes": [{ "direction": [0.0, 1.0, 0.0], "limit": { "effort": 40.0 } }]
        }))
        .unwrap();
        assert_eq!(d.kind, JointKind::Hinge);
        assert_eq!(d.axes[0].limit.effort_limit(), Some(40.0));
        assert_eq!(d.axes[0].limit.lower, -1e16);
        assert_eq!(d.pose, Transform::IDENTITY);
    }

    #[test]
    #[allow(deprecated)]
    fn legacy_document_converts() {
        let doc = json!({
            "name": "drive",
            "type": "gearbox",
            "parent": "gear_a",
            "child": "gear_b",
            "pose": [0.0, 0.0, 0.5, 0.0, 0.0, std::f64::consts::FRAC_PI_2],
            "axis": { "xyz": [0, 0, 1], "dynamics": { "damping": 0.1 } },
            "axis2": { "xyz": [0, 0, 1], "limit": { "effort": 5.0 } },
            "gearbox_ratio": 3.0,
            "gearbox_reference_body": "frame",
            "physics": { "multibody": { "must_be_loop_joint": true } }
        });
        let d = JointDescription::from_document("gears", &doc).unwrap();
        assert_eq!(d.kind, JointKind::Gearbox);
        assert_eq!(d.model, "gears");
        assert_eq!(d.axes.len(), 2);
        assert_eq!(d.axes[0].damping, 0.1);
        assert_eq!(d.axes[1].limit.effort_limit(), Some(5.0));
        assert_eq!(d.gear_ratio, Some(3.0));
        assert_eq!(d.gear_reference.as_deref(), Some("frame"));
        assert!(d.loop_break);
        let x = d.pose.rotate_vector(DVec3::X);
        assert_relative_eq!(x.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(d.pose.position.z, 0.5);
    }

    #[test]
    #[allow(deprecated)]
    fn legacy_document_rejects_unknown_type() {
        let doc = json!({ "name": "slider", "type": "prismatic", "parent": "a", "child": "b" });
        assert!(matches!(
            JointDescription::from_document("m", &doc),
            Err(LoadError::Malformed { .. })
        ));
        assert!(matches!(
            JointDescription::from_document("m", &json!({ "name": 3 })),
            Err(LoadError::Document(_))
        ));
    }
}
