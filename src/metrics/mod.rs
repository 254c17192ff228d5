mod types;

pub use types::{CaptureMetrics, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::models::SnapshotClass;

const MAX_RECENT_CAPTURES: usize = 20;

/// Per-capture timings and process load for the supervision loop.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_captures: VecDeque<CaptureMetrics>,
    capture_count: u64,
    error_count: u64,
    degraded_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta, so establish a baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: VecDeque::with_capacity(MAX_RECENT_CAPTURES),
                capture_count: 0,
                error_count: 0,
                degraded_count: 0,
                system,
                pid,
            })),
        }
    }

    /// Current process CPU percentage and resident memory in MB.
    pub async fn sample_system_metrics(&self) -> (f32, f64) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        if let Some(process) = state.system.process(pid) {
            (process.cpu_usage(), process.memory() as f64 / 1024.0 / 1024.0)
        } else {
            (0.0, 0.0)
        }
    }

    pub async fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.inner.lock().await;

        state.capture_count += 1;
        if metrics.classification == SnapshotClass::Error {
            state.error_count += 1;
        }
        if metrics.degraded {
            state.degraded_count += 1;
        }

        state.recent_captures.push_back(metrics);
        if state.recent_captures.len() > MAX_RECENT_CAPTURES {
            state.recent_captures.pop_front();
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = match state.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        };

        MetricsSnapshot {
            system,
            recent_captures: state.recent_captures.iter().cloned().collect(),
            capture_count: state.capture_count,
            error_count: state.error_count,
            degraded_count: state.degraded_count,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_captures.clear();
        state.capture_count = 0;
        state.error_count = 0;
        state.degraded_count = 0;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn capture(classification: SnapshotClass, degraded: bool) -> CaptureMetrics {
        CaptureMetrics {
            timestamp: Utc::now(),
            capture_ms: 3,
            analysis_ms: Some(12),
            total_ms: 15,
            classification,
            lighting_score: Some(55.0),
            degraded,
            dropped: false,
            cpu_percent: 0.0,
            memory_mb: 0.0,
        }
    }

    #[tokio::test]
    async fn keeps_a_bounded_window_of_captures() {
        let collector = MetricsCollector::new();
        for _ in 0..(MAX_RECENT_CAPTURES + 5) {
            collector.record_capture(capture(SnapshotClass::Verified, false)).await;
        }
        collector.record_capture(capture(SnapshotClass::Error, true)).await;

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.recent_captures.len(), MAX_RECENT_CAPTURES);
        assert_eq!(snapshot.capture_count, MAX_RECENT_CAPTURES as u64 + 6);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.degraded_count, 1);

        collector.reset().await;
        assert_eq!(collector.get_snapshot().await.capture_count, 0);
    }
}
