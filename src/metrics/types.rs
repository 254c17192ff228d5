use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SnapshotClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub timestamp: DateTime<Utc>,
    pub capture_ms: u64,
    pub analysis_ms: Option<u64>,
    pub total_ms: u64,
    pub classification: SnapshotClass,
    pub lighting_score: Option<f32>,
    pub degraded: bool,
    /// Snapshot arrived after the log was sealed and was dropped.
    pub dropped: bool,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub capture_count: u64,
    pub error_count: u64,
    pub degraded_count: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_captures: Vec::new(),
            capture_count: 0,
            error_count: 0,
            degraded_count: 0,
        }
    }
}
