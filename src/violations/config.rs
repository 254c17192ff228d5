use serde::{Deserialize, Serialize};

/// Termination thresholds applied to a finished session's snapshot log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminationPolicy {
    /// Terminate once wrong-person snapshots exceed this count.
    pub max_wrong_person: usize,

    /// Terminate once multiple-face snapshots exceed this count.
    pub max_multiple_faces: usize,

    /// Face-visibility rule: detection rate strictly below this fraction...
    pub min_face_detection_rate: f64,
    /// ...with at least this many snapshots...
    pub min_snapshots_for_visibility: usize,
    /// ...and at most this many verified snapshots.
    pub max_verified_for_visibility: usize,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            max_wrong_person: 2,
            max_multiple_faces: 1,
            min_face_detection_rate: 0.5,
            min_snapshots_for_visibility: 3,
            max_verified_for_visibility: 0,
        }
    }
}
