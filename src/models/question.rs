//! Question data model.
//!
//! Questions are immutable once loaded and owned by the exam session for its
//! whole lifetime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest time a single question may be given, in seconds.
pub const MIN_ALLOWANCE_SECS: u32 = 30;
/// Allowance used when the stored duration is missing or unreadable.
pub const DEFAULT_ALLOWANCE_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; 4] = [OptionLabel::A, OptionLabel::B, OptionLabel::C, OptionLabel::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionLabel::A => "A",
            OptionLabel::B => "B",
            OptionLabel::C => "C",
            OptionLabel::D => "D",
        }
    }

    fn position(self) -> usize {
        match self {
            OptionLabel::A => 0,
            OptionLabel::B => 1,
            OptionLabel::C => 2,
            OptionLabel::D => 3,
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("unknown option label '{0}'")]
    InvalidOptionLabel(String),
    #[error("question prompt is empty")]
    EmptyPrompt,
}

impl FromStr for OptionLabel {
    type Err = QuestionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(OptionLabel::A),
            "B" => Ok(OptionLabel::B),
            "C" => Ok(OptionLabel::C),
            "D" => Ok(OptionLabel::D),
            _ => Err(QuestionError::InvalidOptionLabel(value.to_string())),
        }
    }
}

/// Difficulty tag attached when a question is ingested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "camelCase")]
pub enum Difficulty {
    #[default]
    Basic,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Basic => "basic",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub index: usize,
    pub prompt: String,
    pub options: [String; 4],
    pub correct: OptionLabel,
    pub subject: String,
    pub difficulty: Difficulty,
    allowance_secs: u32,
}

impl Question {
    pub fn new(
        index: usize,
        prompt: impl Into<String>,
        options: [String; 4],
        correct: OptionLabel,
        subject: impl Into<String>,
        difficulty: Difficulty,
        allowance_secs: u32,
    ) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            options,
            correct,
            subject: subject.into(),
            difficulty,
            allowance_secs: clamp_allowance(allowance_secs),
        }
    }

    /// Time allowance in seconds, never below [`MIN_ALLOWANCE_SECS`].
    pub fn allowance_secs(&self) -> u32 {
        self.allowance_secs
    }

    pub fn option_text(&self, label: OptionLabel) -> &str {
        &self.options[label.position()]
    }

    pub fn is_correct(&self, label: OptionLabel) -> bool {
        self.correct == label
    }
}

pub fn clamp_allowance(secs: u32) -> u32 {
    secs.max(MIN_ALLOWANCE_SECS)
}

/// Parse a stored per-question duration field.
///
/// Accepts plain seconds (`"90"`, `" 45 "`) and fractional values, which are
/// truncated. Anything else falls back to [`DEFAULT_ALLOWANCE_SECS`].
pub fn parse_allowance(raw: Option<&str>) -> u32 {
    let parsed = raw.and_then(|value| {
        let value = value.trim();
        value
            .parse::<u32>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u32))
    });

    clamp_allowance(parsed.unwrap_or(DEFAULT_ALLOWANCE_SECS))
}

/// A question as handed over by a question store, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub prompt: String,
    pub options: [String; 4],
    pub correct_option: String,
    pub subject: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub duration: Option<String>,
}

impl QuestionRecord {
    pub fn into_question(self, index: usize) -> Result<Question, QuestionError> {
        if self.prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        let correct = self.correct_option.parse::<OptionLabel>()?;
        let allowance = parse_allowance(self.duration.as_deref());

        Ok(Question::new(
            index,
            self.prompt,
            self.options,
            correct,
            self.subject,
            self.difficulty,
            allowance,
        ))
    }
}
