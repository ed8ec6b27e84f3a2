use serde::{Deserialize, Serialize};

/// Integrator settings for the multibody back-end.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultibodyConfig {
    /// Clamp each mobilizer rate to its axis velocity limit.
    pub enforce_velocity_limits: bool,
}
