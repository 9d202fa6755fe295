//! Diagnostic counters for the analysis pipeline.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, AnalysisLog, AnalysisStats,
    SharedAnalysisLog,
};
