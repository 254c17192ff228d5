use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence and time limits for the supervision loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisionConfig {
    /// Fixed period between scheduled captures. The first capture is immediate.
    pub capture_interval_ms: u64,

    /// Navigation only triggers an extra capture once this much time has
    /// passed since the previous one.
    pub min_capture_gap_ms: u64,

    /// Upper bound for one capture-and-analyze cycle.
    pub capture_timeout_ms: u64,

    /// How long to wait for the camera to report ready before each attempt.
    pub camera_ready_timeout_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 25_000,
            min_capture_gap_ms: 15_000,
            capture_timeout_ms: 10_000,
            camera_ready_timeout_ms: 5_000,
        }
    }
}

impl SupervisionConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(1))
    }

    pub fn min_capture_gap(&self) -> Duration {
        Duration::from_millis(self.min_capture_gap_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn camera_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_ready_timeout_ms)
    }
}

/// Face analyzer tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzerConfig {
    /// Model initialisation attempts before falling back.
    pub max_init_attempts: u32,

    /// Fallback engages once consecutive detection failures exceed this.
    pub max_consecutive_failures: u32,

    /// Lighting below this is too dark; also gates the enhancement retry.
    pub low_light: f32,

    /// Lighting above this is washed out.
    pub high_light: f32,

    /// Length of the synthetic embedding produced in degraded mode.
    pub fallback_embedding_len: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_init_attempts: 3,
            max_consecutive_failures: 5,
            low_light: 30.0,
            high_light: 90.0,
            fallback_embedding_len: 128,
        }
    }
}
