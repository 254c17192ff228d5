use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::exam::{ExamOutcome, ExamStatus};
use crate::models::SnapshotClass;

/// Notifications for whatever renders the exam. Delivered over a broadcast
/// channel; slow subscribers may miss heartbeats but never affect the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExamEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        status: ExamStatus,
        remaining_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat { remaining_secs: u64 },
    #[serde(rename_all = "camelCase")]
    SnapshotRecorded {
        classification: SnapshotClass,
        taken_at: DateTime<Utc>,
        degraded: bool,
    },
    #[serde(rename_all = "camelCase")]
    DegradedMode { session_id: String },
    Finished { outcome: Box<ExamOutcome> },
}
