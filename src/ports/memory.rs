use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{IdentityEnrollment, QuestionSource, ResultsSink};
use crate::models::{Embedding, Question, Snapshot};
use crate::scoring::SubjectScoreBreakdown;

/// Question bank keyed by discipline.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQuestionSource {
    banks: Arc<Mutex<HashMap<String, Vec<Question>>>>,
}

impl InMemoryQuestionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, discipline: impl Into<String>, questions: Vec<Question>) {
        if let Ok(mut banks) = self.banks.lock() {
            banks.insert(discipline.into(), questions);
        }
    }
}

#[async_trait]
impl QuestionSource for InMemoryQuestionSource {
    /// An empty `sub_categories` selects every subject. Returned questions are
    /// re-indexed to their position in the filtered set.
    async fn fetch_questions(&self, discipline: &str, sub_categories: &[String]) -> Result<Vec<Question>> {
        let banks = self
            .banks
            .lock()
            .map_err(|e| anyhow!("question bank lock poisoned: {e}"))?;
        let Some(bank) = banks.get(discipline) else {
            return Ok(Vec::new());
        };

        let questions = bank
            .iter()
            .filter(|q| sub_categories.is_empty() || sub_categories.iter().any(|s| s == &q.subject))
            .enumerate()
            .map(|(index, q)| {
                let mut question = q.clone();
                question.index = index;
                question
            })
            .collect();
        Ok(questions)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEnrollment {
    references: Arc<Mutex<HashMap<String, Vec<Embedding>>>>,
}

impl InMemoryEnrollment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, candidate_id: impl Into<String>, embeddings: Vec<Embedding>) {
        if let Ok(mut references) = self.references.lock() {
            references.insert(candidate_id.into(), embeddings);
        }
    }
}

#[async_trait]
impl IdentityEnrollment for InMemoryEnrollment {
    async fn get_reference_embeddings(&self, candidate_id: &str) -> Result<Vec<Embedding>> {
        let references = self
            .references
            .lock()
            .map_err(|e| anyhow!("enrollment lock poisoned: {e}"))?;
        Ok(references.get(candidate_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct SavedResult {
    pub candidate_id: String,
    pub score: u32,
    pub breakdown: SubjectScoreBreakdown,
    pub discipline: String,
    pub question_count: usize,
}

/// Collects results in memory. `fail_next` makes the following save fail,
/// which is how hosts and tests exercise the retry path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResults {
    saved: Arc<Mutex<Vec<SavedResult>>>,
    archived: Arc<Mutex<HashMap<String, Vec<Snapshot>>>>,
    failures_pending: Arc<Mutex<u32>>,
}

impl InMemoryResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        if let Ok(mut pending) = self.failures_pending.lock() {
            *pending = count;
        }
    }

    pub fn records(&self) -> Vec<SavedResult> {
        self.saved.lock().map(|saved| saved.clone()).unwrap_or_default()
    }

    pub fn archived(&self, session_id: &str) -> Vec<Snapshot> {
        self.archived
            .lock()
            .ok()
            .and_then(|archived| archived.get(session_id).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultsSink for InMemoryResults {
    async fn save_result(
        &self,
        candidate_id: &str,
        score: u32,
        breakdown: &SubjectScoreBreakdown,
        discipline: &str,
        question_count: usize,
    ) -> Result<()> {
        {
            let mut pending = self
                .failures_pending
                .lock()
                .map_err(|e| anyhow!("results lock poisoned: {e}"))?;
            if *pending > 0 {
                *pending -= 1;
                return Err(anyhow!("results store unavailable"));
            }
        }

        let mut saved = self
            .saved
            .lock()
            .map_err(|e| anyhow!("results lock poisoned: {e}"))?;
        saved.push(SavedResult {
            candidate_id: candidate_id.to_string(),
            score,
            breakdown: breakdown.clone(),
            discipline: discipline.to_string(),
            question_count,
        });
        Ok(())
    }

    async fn archive_snapshots(&self, session_id: &str, _candidate_id: &str, snapshots: &[Snapshot]) -> Result<()> {
        let mut archived = self
            .archived
            .lock()
            .map_err(|e| anyhow!("archive lock poisoned: {e}"))?;
        archived.insert(session_id.to_string(), snapshots.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, OptionLabel};

    fn question(subject: &str) -> Question {
        Question::new(
            0,
            format!("{subject} prompt"),
            ["a".into(), "b".into(), "c".into(), "d".into()],
            OptionLabel::A,
            subject,
            Difficulty::Basic,
            60,
        )
    }

    #[tokio::test]
    async fn filters_by_sub_category_and_reindexes() {
        let source = InMemoryQuestionSource::new();
        source.insert("law", vec![question("civil"), question("penal"), question("civil")]);

        let all = source.fetch_questions("law", &[]).await.unwrap();
        assert_eq!(all.len(), 3);

        let civil = source.fetch_questions("law", &["civil".to_string()]).await.unwrap();
        assert_eq!(civil.len(), 2);
        assert_eq!(civil.iter().map(|q| q.index).collect::<Vec<_>>(), vec![0, 1]);

        assert!(source.fetch_questions("medicine", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_candidate_has_no_references() {
        let enrollment = InMemoryEnrollment::new();
        enrollment.enroll("c-1", vec![Embedding::new(vec![1.0, 0.0])]);
        assert_eq!(enrollment.get_reference_embeddings("c-1").await.unwrap().len(), 1);
        assert!(enrollment.get_reference_embeddings("c-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scheduled_failures_precede_success() {
        let results = InMemoryResults::new();
        results.fail_next(1);
        let breakdown = SubjectScoreBreakdown::default();

        assert!(results.save_result("c-1", 2, &breakdown, "law", 3).await.is_err());
        assert!(results.records().is_empty());

        results.save_result("c-1", 2, &breakdown, "law", 3).await.unwrap();
        assert_eq!(results.records().len(), 1);
        assert_eq!(results.records()[0].score, 2);
    }
}
