use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::SubjectScoreBreakdown;

/// One row of `exam_results`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: i64,
    pub candidate_id: String,
    pub discipline: String,
    pub score: u32,
    pub question_count: u64,
    pub breakdown: SubjectScoreBreakdown,
    pub created_at: DateTime<Utc>,
}
