use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Difficulty, OptionLabel, Question};
use crate::violations::{TerminationReason, TerminationVerdict};

/// Correct-answer counts per subject, with termination metadata for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScoreBreakdown {
    pub per_subject: BTreeMap<String, u32>,
    pub per_difficulty: BTreeMap<Difficulty, u32>,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
    pub snapshot_total: usize,
    pub face_detection_rate: f64,
    pub verification_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    /// Correct answers before any termination override.
    pub raw_score: u32,
    /// Reported score: zero for terminated sessions, `raw_score` otherwise.
    pub score: u32,
    pub question_count: usize,
    pub answered: usize,
    pub breakdown: SubjectScoreBreakdown,
}

impl ScoreReport {
    pub fn percentage(&self) -> f64 {
        if self.question_count == 0 {
            return 0.0;
        }
        f64::from(self.score) * 100.0 / self.question_count as f64
    }
}

/// Number of answers that match their question's correct option.
pub fn raw_score(questions: &[Question], answers: &BTreeMap<usize, OptionLabel>) -> u32 {
    questions
        .iter()
        .enumerate()
        .filter(|(i, q)| answers.get(i).is_some_and(|label| q.is_correct(*label)))
        .count() as u32
}

/// Score a finished session. The termination override is applied here and
/// nowhere else.
pub fn score(
    questions: &[Question],
    answers: &BTreeMap<usize, OptionLabel>,
    verdict: &TerminationVerdict,
) -> ScoreReport {
    let mut per_subject: BTreeMap<String, u32> = BTreeMap::new();
    let mut per_difficulty: BTreeMap<Difficulty, u32> = BTreeMap::new();

    for (i, question) in questions.iter().enumerate() {
        let subject = per_subject.entry(question.subject.clone()).or_insert(0);
        let difficulty = per_difficulty.entry(question.difficulty).or_insert(0);
        if answers.get(&i).is_some_and(|label| question.is_correct(*label)) {
            *subject += 1;
            *difficulty += 1;
        }
    }

    let raw = raw_score(questions, answers);
    let score = if verdict.terminated {
        log::info!(
            "Session terminated ({}); reporting 0 instead of raw score {}",
            verdict.reason_text().unwrap_or("unspecified"),
            raw
        );
        0
    } else {
        raw
    };

    ScoreReport {
        raw_score: raw,
        score,
        question_count: questions.len(),
        answered: answers.keys().filter(|i| **i < questions.len()).count(),
        breakdown: SubjectScoreBreakdown {
            per_subject,
            per_difficulty,
            terminated: verdict.terminated,
            termination_reason: verdict.reason,
            snapshot_total: verdict.total,
            face_detection_rate: verdict.face_detection_rate,
            verification_rate: verdict.verification_rate,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violations::{aggregate, TerminationPolicy};

    fn question(index: usize, subject: &str, difficulty: Difficulty, correct: OptionLabel) -> Question {
        Question::new(
            index,
            format!("Question {index}"),
            ["a".into(), "b".into(), "c".into(), "d".into()],
            correct,
            subject,
            difficulty,
            60,
        )
    }

    fn questions() -> Vec<Question> {
        vec![
            question(0, "sql", Difficulty::Basic, OptionLabel::A),
            question(1, "sql", Difficulty::Advanced, OptionLabel::C),
            question(2, "networking", Difficulty::Intermediate, OptionLabel::D),
        ]
    }

    fn clean_verdict() -> TerminationVerdict {
        aggregate(&[], &TerminationPolicy::default())
    }

    fn terminated_verdict() -> TerminationVerdict {
        let mut verdict = clean_verdict();
        verdict.terminated = true;
        verdict.reason = Some(TerminationReason::MultipleFaces);
        verdict
    }

    #[test]
    fn unanswered_questions_score_nothing() {
        let report = score(&questions(), &BTreeMap::new(), &clean_verdict());
        assert_eq!(report.raw_score, 0);
        assert_eq!(report.answered, 0);
        assert_eq!(report.breakdown.per_subject.get("sql"), Some(&0));
    }

    #[test]
    fn clean_session_reports_raw_score() {
        let answers = BTreeMap::from([(0, OptionLabel::A), (1, OptionLabel::B), (2, OptionLabel::D)]);
        let report = score(&questions(), &answers, &clean_verdict());
        assert_eq!(report.raw_score, 2);
        assert_eq!(report.score, 2);
        assert_eq!(report.breakdown.per_subject.get("sql"), Some(&1));
        assert_eq!(report.breakdown.per_subject.get("networking"), Some(&1));
        assert_eq!(report.breakdown.per_difficulty.get(&Difficulty::Advanced), Some(&0));
        assert!(!report.breakdown.terminated);
    }

    #[test]
    fn terminated_session_reports_zero_but_keeps_raw() {
        let answers = BTreeMap::from([(0, OptionLabel::A), (1, OptionLabel::C), (2, OptionLabel::D)]);
        let report = score(&questions(), &answers, &terminated_verdict());
        assert_eq!(report.raw_score, 3);
        assert_eq!(report.score, 0);
        assert!(report.breakdown.terminated);
        assert_eq!(report.breakdown.termination_reason, Some(TerminationReason::MultipleFaces));
        assert_eq!(report.percentage(), 0.0);
    }
}
