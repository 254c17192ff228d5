pub mod embedding;
pub mod question;
pub mod snapshot;

pub use embedding::{Embedding, IdentityReference};
pub use question::{
    parse_allowance, Difficulty, OptionLabel, Question, QuestionError, QuestionRecord,
    DEFAULT_ALLOWANCE_SECS, MIN_ALLOWANCE_SECS,
};
pub use snapshot::{FrameRef, Snapshot, SnapshotClass};
