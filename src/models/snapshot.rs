//! Supervision snapshot data model.
//!
//! One snapshot is the classified outcome of a single capture-and-analyze
//! cycle. Snapshots are immutable once created and only ever appended to the
//! session's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Embedding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotClass {
    Verified,
    WrongPerson,
    MultipleFaces,
    NoFace,
    Error,
}

impl SnapshotClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotClass::Verified => "Verified",
            SnapshotClass::WrongPerson => "WrongPerson",
            SnapshotClass::MultipleFaces => "MultipleFaces",
            SnapshotClass::NoFace => "NoFace",
            SnapshotClass::Error => "Error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Verified" => Some(SnapshotClass::Verified),
            "WrongPerson" => Some(SnapshotClass::WrongPerson),
            "MultipleFaces" => Some(SnapshotClass::MultipleFaces),
            "NoFace" => Some(SnapshotClass::NoFace),
            "Error" => Some(SnapshotClass::Error),
            _ => None,
        }
    }
}

/// Opaque handle to a captured frame. The engine never stores pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRef(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub frame: Option<FrameRef>,
    pub classification: SnapshotClass,
    pub embedding: Option<Embedding>,
    pub matched: Option<bool>,
    pub lighting_score: Option<f32>,
    /// Produced while the analyzer was running on its synthetic fallback.
    pub degraded: bool,
    pub detail: Option<String>,
}

impl Snapshot {
    /// Snapshot for a cycle that produced no usable analysis.
    pub fn error(taken_at: DateTime<Utc>, frame: Option<FrameRef>, detail: impl Into<String>) -> Self {
        Self {
            taken_at,
            frame,
            classification: SnapshotClass::Error,
            embedding: None,
            matched: None,
            lighting_score: None,
            degraded: false,
            detail: Some(detail.into()),
        }
    }

    /// Bare snapshot with only a classification, mostly useful for replaying logs.
    pub fn classified(taken_at: DateTime<Utc>, classification: SnapshotClass) -> Self {
        Self {
            taken_at,
            frame: None,
            classification,
            embedding: None,
            matched: None,
            lighting_score: None,
            degraded: false,
            detail: None,
        }
    }
}
