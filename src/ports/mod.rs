//! Collaborators the engine calls out to. Implementations live with the host.

mod memory;

pub use memory::{InMemoryEnrollment, InMemoryQuestionSource, InMemoryResults, SavedResult};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Embedding, Question, Snapshot};
use crate::scoring::SubjectScoreBreakdown;

#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch_questions(&self, discipline: &str, sub_categories: &[String]) -> Result<Vec<Question>>;
}

#[async_trait]
pub trait IdentityEnrollment: Send + Sync {
    async fn get_reference_embeddings(&self, candidate_id: &str) -> Result<Vec<Embedding>>;
}

/// Result persistence. Called once per finished session; retry policy is
/// the sink's business.
#[async_trait]
pub trait ResultsSink: Send + Sync {
    async fn save_result(
        &self,
        candidate_id: &str,
        score: u32,
        breakdown: &SubjectScoreBreakdown,
        discipline: &str,
        question_count: usize,
    ) -> Result<()>;

    /// Keep the snapshot log for audit. Failures are logged, never fatal.
    async fn archive_snapshots(
        &self,
        _session_id: &str,
        _candidate_id: &str,
        _snapshots: &[Snapshot],
    ) -> Result<()> {
        Ok(())
    }
}
