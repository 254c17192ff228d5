mod budget;
mod controller;
mod session;
mod snapshot_log;

pub use budget::TimingBudget;
pub use controller::{ExamController, ExamDeps, ExamOutcome, ExamSetup, RulesOverview};
pub use session::{
    ExamSession, ExamStatus, ExamView, FinishTransition, FinishTrigger, QuestionView, TickOutcome,
};
pub use snapshot_log::{SnapshotLog, SnapshotProducer};
