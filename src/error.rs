//! Engine-level errors.
//!
//! Capture and analysis failures normally never reach the caller: the
//! supervision loop turns them into `Error` snapshots. They appear here so the
//! leaf error types can be converted when a host drives those pieces directly.

use thiserror::Error;

use crate::exam::ExamStatus;
use crate::supervision::{AnalysisError, CaptureError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProctorError {
    #[error("assessment has no questions")]
    EmptyQuestionSet,
    #[error("candidate {candidate_id} has no enrolled identity reference")]
    NoEnrolledReference { candidate_id: String },
    #[error(transparent)]
    CaptureUnavailable(#[from] CaptureError),
    #[error(transparent)]
    AnalysisFailure(#[from] AnalysisError),
    #[error("failed to persist exam result: {0:#}")]
    PersistenceFailure(anyhow::Error),
    #[error("operation requires the session to be {expected:?}, but it is {actual:?}")]
    InvalidState {
        expected: ExamStatus,
        actual: ExamStatus,
    },
    #[error("submit is only available on the last question")]
    NotOnLastQuestion,
    #[error("failed to load questions: {0:#}")]
    QuestionSource(anyhow::Error),
    #[error("failed to load identity references: {0:#}")]
    Enrollment(anyhow::Error),
}

pub type Result<T, E = ProctorError> = std::result::Result<T, E>;
