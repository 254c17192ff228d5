use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_i64, to_u32, to_u64},
    models::StoredResult,
};
use crate::models::Snapshot;
use crate::ports::ResultsSink;
use crate::scoring::SubjectScoreBreakdown;

fn row_to_result(row: &Row) -> Result<StoredResult> {
    let score: i64 = row.get("score")?;
    let question_count: i64 = row.get("question_count")?;
    let breakdown_json: String = row.get("breakdown_json")?;
    let created_at: String = row.get("created_at")?;

    Ok(StoredResult {
        id: row.get("id")?,
        candidate_id: row.get("candidate_id")?,
        discipline: row.get("discipline")?,
        score: to_u32(score, "score")?,
        question_count: to_u64(question_count, "question_count")?,
        breakdown: serde_json::from_str(&breakdown_json).context("failed to parse breakdown_json")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_result(
        &self,
        candidate_id: &str,
        score: u32,
        breakdown: &SubjectScoreBreakdown,
        discipline: &str,
        question_count: usize,
    ) -> Result<i64> {
        let candidate_id = candidate_id.to_string();
        let discipline = discipline.to_string();
        let terminated = breakdown.terminated;
        let termination_reason = breakdown.termination_reason.map(|reason| reason.as_str());
        let breakdown_json = serde_json::to_string(breakdown).context("failed to serialize breakdown")?;
        let question_count = to_i64(question_count as u64)?;

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO exam_results (candidate_id, discipline, score, question_count, terminated, termination_reason, breakdown_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    candidate_id,
                    discipline,
                    i64::from(score),
                    question_count,
                    terminated,
                    termination_reason,
                    breakdown_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to insert exam result")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_results_for_candidate(&self, candidate_id: &str) -> Result<Vec<StoredResult>> {
        let candidate_id = candidate_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, candidate_id, discipline, score, question_count, breakdown_json, created_at
                 FROM exam_results
                 WHERE candidate_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![candidate_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_result(row)?);
            }
            Ok(results)
        })
        .await
    }
}

#[async_trait]
impl ResultsSink for Database {
    async fn save_result(
        &self,
        candidate_id: &str,
        score: u32,
        breakdown: &SubjectScoreBreakdown,
        discipline: &str,
        question_count: usize,
    ) -> Result<()> {
        self.insert_result(candidate_id, score, breakdown, discipline, question_count)
            .await
            .map(|_| ())
    }

    async fn archive_snapshots(&self, session_id: &str, candidate_id: &str, snapshots: &[Snapshot]) -> Result<()> {
        self.insert_snapshots(session_id, candidate_id, snapshots)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violations::TerminationReason;

    #[tokio::test]
    async fn saved_results_round_trip_through_sqlite() {
        let db = Database::in_memory().unwrap();
        let mut breakdown = SubjectScoreBreakdown::default();
        breakdown.per_subject.insert("civil".into(), 2);
        breakdown.terminated = true;
        breakdown.termination_reason = Some(TerminationReason::MultipleFaces);
        breakdown.snapshot_total = 4;

        db.save_result("c-1", 0, &breakdown, "law", 3).await.unwrap();
        db.save_result("c-2", 3, &SubjectScoreBreakdown::default(), "law", 3)
            .await
            .unwrap();

        let stored = db.get_results_for_candidate("c-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].score, 0);
        assert_eq!(stored[0].question_count, 3);
        assert_eq!(stored[0].discipline, "law");
        assert_eq!(stored[0].breakdown, breakdown);
    }
}
