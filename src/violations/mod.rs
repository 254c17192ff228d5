pub mod aggregator;
pub mod config;

pub use aggregator::{aggregate, ClassCounts, TerminationReason, TerminationVerdict};
pub use config::TerminationPolicy;
