use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_classification, parse_datetime},
};
use crate::models::{FrameRef, Snapshot};

fn row_to_snapshot(row: &Row) -> Result<Snapshot> {
    let taken_at: String = row.get("taken_at")?;
    let classification: String = row.get("classification")?;
    let lighting_score: Option<f64> = row.get("lighting_score")?;

    Ok(Snapshot {
        taken_at: parse_datetime(&taken_at, "taken_at")?,
        frame: row.get::<_, Option<String>>("frame_ref")?.map(FrameRef),
        classification: parse_classification(&classification)?,
        // Embeddings are biometric data and are not archived.
        embedding: None,
        matched: row.get("matched")?,
        lighting_score: lighting_score.map(|score| score as f32),
        degraded: row.get("degraded")?,
        detail: row.get("detail")?,
    })
}

impl Database {
    /// Append a session's snapshot log in one transaction.
    pub async fn insert_snapshots(
        &self,
        session_id: &str,
        candidate_id: &str,
        snapshots: &[Snapshot],
    ) -> Result<usize> {
        let session_id = session_id.to_string();
        let candidate_id = candidate_id.to_string();
        let records = snapshots.to_vec();

        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open snapshot transaction")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO exam_snapshots (session_id, candidate_id, taken_at, classification, matched, lighting_score, degraded, frame_ref, detail)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        session_id,
                        candidate_id,
                        record.taken_at.to_rfc3339(),
                        record.classification.as_str(),
                        record.matched,
                        record.lighting_score.map(f64::from),
                        record.degraded,
                        record.frame.as_ref().map(|frame| frame.0.as_str()),
                        record.detail,
                    ])
                    .context("failed to insert snapshot")?;
                }
            }
            tx.commit().context("failed to commit snapshots")?;
            Ok(records.len())
        })
        .await
    }

    pub async fn get_snapshots_for_session(&self, session_id: &str) -> Result<Vec<Snapshot>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT taken_at, classification, matched, lighting_score, degraded, frame_ref, detail
                 FROM exam_snapshots
                 WHERE session_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_snapshot(row)?);
            }
            Ok(snapshots)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotClass;
    use chrono::Utc;

    #[tokio::test]
    async fn archived_log_keeps_order_and_audit_fields() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();

        let mut degraded = Snapshot::classified(now, SnapshotClass::Verified);
        degraded.degraded = true;
        degraded.lighting_score = Some(42.5);
        let failed = Snapshot::error(now, Some(FrameRef("f-2".into())), "camera unavailable");

        let written = db
            .insert_snapshots("s-1", "c-1", &[degraded, failed])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let restored = db.get_snapshots_for_session("s-1").await.unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored[0].degraded);
        assert_eq!(restored[0].lighting_score, Some(42.5));
        assert_eq!(restored[1].classification, SnapshotClass::Error);
        assert_eq!(restored[1].frame, Some(FrameRef("f-2".into())));
        assert_eq!(restored[1].detail.as_deref(), Some("camera unavailable"));

        assert!(db.get_snapshots_for_session("s-2").await.unwrap().is_empty());
    }
}
