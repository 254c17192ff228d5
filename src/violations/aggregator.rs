use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Snapshot, SnapshotClass};
use crate::violations::config::TerminationPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TerminationReason {
    DifferentPerson,
    MultipleFaces,
    FaceNotVisible,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::DifferentPerson => "different person detected",
            TerminationReason::MultipleFaces => "multiple faces detected",
            TerminationReason::FaceNotVisible => "face not visible",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-classification tallies of a snapshot log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassCounts {
    pub verified: usize,
    pub wrong_person: usize,
    pub multiple_faces: usize,
    pub no_face: usize,
    pub error: usize,
}

impl ClassCounts {
    pub fn record(&mut self, class: SnapshotClass) {
        match class {
            SnapshotClass::Verified => self.verified += 1,
            SnapshotClass::WrongPerson => self.wrong_person += 1,
            SnapshotClass::MultipleFaces => self.multiple_faces += 1,
            SnapshotClass::NoFace => self.no_face += 1,
            SnapshotClass::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.verified + self.wrong_person + self.multiple_faces + self.no_face + self.error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminationVerdict {
    pub total: usize,
    pub counts: ClassCounts,
    pub degraded: usize,
    pub face_detection_rate: f64,
    pub verification_rate: f64,
    pub terminated: bool,
    pub reason: Option<TerminationReason>,
}

impl TerminationVerdict {
    pub fn reason_text(&self) -> Option<&'static str> {
        self.reason.map(|r| r.as_str())
    }
}

/// Aggregate a finished session's snapshot log into a termination verdict.
///
/// Pure over `snapshots`: the same log always yields the same verdict.
pub fn aggregate(snapshots: &[Snapshot], policy: &TerminationPolicy) -> TerminationVerdict {
    let mut counts = ClassCounts::default();
    let mut degraded = 0;
    for snapshot in snapshots {
        counts.record(snapshot.classification);
        if snapshot.degraded {
            degraded += 1;
        }
    }

    from_counts(counts, degraded, policy)
}

/// Verdict from pre-tallied counts. `aggregate` delegates here.
pub fn from_counts(counts: ClassCounts, degraded: usize, policy: &TerminationPolicy) -> TerminationVerdict {
    let total = counts.total();

    let face_detection_rate = if total == 0 {
        0.0
    } else {
        (total - counts.no_face - counts.error) as f64 / total as f64
    };

    let single_face_count = total - counts.no_face - counts.multiple_faces - counts.error;
    let verification_rate = if single_face_count == 0 {
        0.0
    } else {
        counts.verified as f64 / single_face_count as f64
    };

    let reason = evaluate_rules(total, &counts, face_detection_rate, policy);

    TerminationVerdict {
        total,
        counts,
        degraded,
        face_detection_rate,
        verification_rate,
        terminated: reason.is_some(),
        reason,
    }
}

// First matching rule wins.
fn evaluate_rules(
    total: usize,
    counts: &ClassCounts,
    face_detection_rate: f64,
    policy: &TerminationPolicy,
) -> Option<TerminationReason> {
    if total == 0 {
        log::warn!("No supervision snapshots recorded; treating as a capture issue, not a violation");
        return None;
    }

    if counts.wrong_person > policy.max_wrong_person {
        return Some(TerminationReason::DifferentPerson);
    }

    if counts.multiple_faces > policy.max_multiple_faces {
        return Some(TerminationReason::MultipleFaces);
    }

    if face_detection_rate < policy.min_face_detection_rate
        && total >= policy.min_snapshots_for_visibility
        && counts.verified <= policy.max_verified_for_visibility
    {
        return Some(TerminationReason::FaceNotVisible);
    }

    None
}
