//! Measurement sessions: input files, pipelines, and calibration caching.

pub mod cache;
pub mod file;
pub mod runner;
pub mod types;

// Re-export commonly used types
pub use cache::{create_shared_cache, CalibrationCache, SharedCalibrationCache};
pub use file::{SessionFile, SessionFileError};
pub use runner::{CalibrationOutcome, CalibrationSession, Q0Outcome, Q0Session, SessionCounters};
pub use types::{SessionKey, SessionMeta};
