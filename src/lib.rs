//! Proctored assessment engine.
//!
//! An [`ExamController`] runs one timed, multiple-choice exam session: a
//! countdown seeded from the per-question allowances, a supervision task that
//! periodically captures the candidate's camera and classifies each frame, and
//! a single finish path that aggregates the snapshot log into a termination
//! verdict, scores the answers and hands the result to a [`ResultsSink`].
//!
//! Hosts plug in a [`QuestionSource`], an [`IdentityEnrollment`], a
//! [`CaptureSource`] and a [`FaceDetector`]. [`Database`] is a ready-made
//! SQLite results sink.

pub mod db;
pub mod error;
pub mod events;
pub mod exam;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod scoring;
pub mod settings;
pub mod supervision;
pub mod utils;
pub mod violations;

pub use db::Database;
pub use error::{ProctorError, Result};
pub use events::ExamEvent;
pub use exam::{ExamController, ExamDeps, ExamOutcome, ExamSetup, ExamStatus, ExamView, FinishTrigger};
pub use models::{Embedding, OptionLabel, Question, Snapshot, SnapshotClass};
pub use ports::{IdentityEnrollment, QuestionSource, ResultsSink};
pub use settings::{ProctorSettings, SettingsStore};
pub use supervision::{CameraStatus, CaptureSource, FaceDetector};
pub use utils::init_logging;
pub use violations::{TerminationPolicy, TerminationReason, TerminationVerdict};
