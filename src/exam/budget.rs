use crate::error::{ProctorError, Result};
use crate::models::{question::clamp_allowance, Question};

/// Single countdown seed for a whole exam, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingBudget {
    total_secs: u64,
}

impl TimingBudget {
    pub fn from_questions(questions: &[Question]) -> Result<Self> {
        Self::from_allowances(questions.iter().map(Question::allowance_secs))
    }

    /// Each allowance is clamped to the per-question minimum before summing.
    pub fn from_allowances<I>(allowances: I) -> Result<Self>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut count = 0usize;
        let total_secs: u64 = allowances
            .into_iter()
            .inspect(|_| count += 1)
            .map(|secs| u64::from(clamp_allowance(secs)))
            .sum();

        if count == 0 {
            return Err(ProctorError::EmptyQuestionSet);
        }

        Ok(Self { total_secs })
    }

    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }
}
