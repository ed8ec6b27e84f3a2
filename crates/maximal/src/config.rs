use serde::{Deserialize, Serialize};

/// Solver settings for the maximal-coordinate back-end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaximalConfig {
    /// Sequential-impulse passes per step.
    pub iterations: u32,
    /// Fraction of positional error corrected per step.
    pub erp: f64,
    /// Put slow bodies to sleep (clears the link's enabled flag).
    pub auto_disable: bool,
    pub sleep_linear_threshold: f64,
    pub sleep_angular_threshold: f64,
    /// Consecutive slow steps before a body sleeps.
    pub sleep_steps: u32,
}

impl Default for MaximalConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            erp: 0.2,
            auto_disable: false,
            sleep_linear_threshold: 0.01,
            sleep_angular_threshold: 0.01,
            sleep_steps: 10,
        }
    }
}
