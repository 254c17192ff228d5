use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProctorError, Result};
use crate::models::{OptionLabel, Question};

use super::budget::TimingBudget;
use super::snapshot_log::SnapshotLog;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExamStatus {
    /// Instructions shown, no timer, no supervision.
    #[default]
    Rules,
    Active,
    Finished,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::Rules => "Rules",
            ExamStatus::Active => "Active",
            ExamStatus::Finished => "Finished",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FinishTrigger {
    TimeExpired,
    Submitted,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session is not active; the tick was ignored.
    Inactive,
    Running { remaining_secs: u64 },
    /// Countdown hit zero on this or an earlier tick.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishTransition {
    Performed,
    AlreadyFinished,
    NotStarted,
}

/// Question as shown to the candidate; never carries the correct option.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub index: usize,
    pub prompt: String,
    pub options: Vec<(OptionLabel, String)>,
    pub subject: String,
    pub selected: Option<OptionLabel>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamView {
    pub session_id: String,
    pub status: ExamStatus,
    pub current_index: usize,
    pub question_count: usize,
    pub answered: usize,
    pub remaining_secs: u64,
    pub is_last_question: bool,
    pub question: Option<QuestionView>,
}

/// Exam session state. Pure and synchronous: the controller decides when to
/// call each transition and which task owns which field.
#[derive(Debug)]
pub struct ExamSession {
    id: String,
    candidate_id: String,
    discipline: String,
    questions: Arc<[Question]>,
    budget: TimingBudget,
    current_index: usize,
    answers: BTreeMap<usize, OptionLabel>,
    countdown_secs: u64,
    status: ExamStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    finish_trigger: Option<FinishTrigger>,
    snapshots: SnapshotLog,
}

impl ExamSession {
    pub fn new(
        id: impl Into<String>,
        candidate_id: impl Into<String>,
        discipline: impl Into<String>,
        questions: Vec<Question>,
    ) -> Result<Self> {
        if questions.is_empty() {
            return Err(ProctorError::EmptyQuestionSet);
        }
        let budget = TimingBudget::from_questions(&questions)?;

        Ok(Self {
            id: id.into(),
            candidate_id: candidate_id.into(),
            discipline: discipline.into(),
            questions: questions.into(),
            budget,
            current_index: 0,
            answers: BTreeMap::new(),
            countdown_secs: 0,
            status: ExamStatus::Rules,
            started_at: None,
            ended_at: None,
            finish_trigger: None,
            snapshots: SnapshotLog::new(),
        })
    }

    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require(ExamStatus::Rules)?;
        self.status = ExamStatus::Active;
        self.countdown_secs = self.budget.total_secs();
        self.started_at = Some(now);
        Ok(())
    }

    /// One elapsed second. Only ever called by the ticker.
    ///
    /// The tick that reaches zero also performs `Active -> Finished`, so no
    /// answer can land between expiry and the end of the session. Only that
    /// tick reports `Expired`; later ones are `Inactive`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.status != ExamStatus::Active {
            return TickOutcome::Inactive;
        }
        self.countdown_secs = self.countdown_secs.saturating_sub(1);
        if self.countdown_secs == 0 {
            self.finish(now, FinishTrigger::TimeExpired);
            TickOutcome::Expired
        } else {
            TickOutcome::Running {
                remaining_secs: self.countdown_secs,
            }
        }
    }

    /// Returns whether the index moved. Stepping past either end is a no-op.
    pub fn next(&mut self) -> Result<bool> {
        self.require(ExamStatus::Active)?;
        if self.current_index + 1 >= self.questions.len() {
            return Ok(false);
        }
        self.current_index += 1;
        Ok(true)
    }

    pub fn previous(&mut self) -> Result<bool> {
        self.require(ExamStatus::Active)?;
        if self.current_index == 0 {
            return Ok(false);
        }
        self.current_index -= 1;
        Ok(true)
    }

    /// Record or overwrite the answer for the current question only.
    pub fn select(&mut self, label: OptionLabel) -> Result<()> {
        self.require(ExamStatus::Active)?;
        self.answers.insert(self.current_index, label);
        Ok(())
    }

    pub fn check_submit(&self) -> Result<()> {
        self.require(ExamStatus::Active)?;
        if !self.is_last_question() {
            return Err(ProctorError::NotOnLastQuestion);
        }
        Ok(())
    }

    /// `Active -> Finished`. Seals the snapshot log in the same step; the end
    /// timestamp is never earlier than the last snapshot already appended.
    pub fn finish(&mut self, now: DateTime<Utc>, trigger: FinishTrigger) -> FinishTransition {
        match self.status {
            ExamStatus::Rules => FinishTransition::NotStarted,
            ExamStatus::Finished => FinishTransition::AlreadyFinished,
            ExamStatus::Active => {
                self.status = ExamStatus::Finished;
                self.ended_at = Some(self.snapshots.seal(now));
                self.finish_trigger = Some(trigger);
                FinishTransition::Performed
            }
        }
    }

    pub fn view(&self) -> ExamView {
        let question = (self.status == ExamStatus::Active).then(|| {
            let q = &self.questions[self.current_index];
            QuestionView {
                index: self.current_index,
                prompt: q.prompt.clone(),
                options: OptionLabel::ALL
                    .iter()
                    .map(|label| (*label, q.option_text(*label).to_string()))
                    .collect(),
                subject: q.subject.clone(),
                selected: self.answers.get(&self.current_index).copied(),
            }
        });

        ExamView {
            session_id: self.id.clone(),
            status: self.status,
            current_index: self.current_index,
            question_count: self.questions.len(),
            answered: self.answers.len(),
            remaining_secs: self.remaining_secs(),
            is_last_question: self.is_last_question(),
            question,
        }
    }

    fn require(&self, expected: ExamStatus) -> Result<()> {
        if self.status != expected {
            return Err(ProctorError::InvalidState {
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 == self.questions.len()
    }

    pub fn remaining_secs(&self) -> u64 {
        match self.status {
            ExamStatus::Rules => self.budget.total_secs(),
            _ => self.countdown_secs,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn discipline(&self) -> &str {
        &self.discipline
    }

    pub fn questions(&self) -> Arc<[Question]> {
        Arc::clone(&self.questions)
    }

    pub fn answers(&self) -> &BTreeMap<usize, OptionLabel> {
        &self.answers
    }

    pub fn budget(&self) -> TimingBudget {
        self.budget
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn status(&self) -> ExamStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn finish_trigger(&self) -> Option<FinishTrigger> {
        self.finish_trigger
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }
}
