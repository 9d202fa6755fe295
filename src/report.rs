//! Versioned analysis records.
//!
//! Every completed session produces a plain, acyclic JSON record:
//! calibration records carry the fitted model and its runs, Q0 records
//! carry per-run estimates and name the calibration record they used.
//! Records are the long-lived artifact of a measurement; buffers and
//! sessions are not persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::calibration::{CalibrationModel, CalibrationPoint};
use crate::core::fit::LinearFit;
use crate::core::q0::Q0Estimate;
use crate::core::segment::{ReferenceParams, Run, RunKind};
use crate::session::runner::{CalibrationOutcome, Q0Outcome, SessionCounters};
use crate::session::types::SessionMeta;

/// Version of the record format.
pub const RECORD_VERSION: &str = "1.0";

/// Producer name embedded in records.
pub const PRODUCER_NAME: &str = "srf-q0-analyzer";

/// Identifies the software that wrote a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    /// Producer name.
    pub name: String,
    /// Producer version.
    pub version: String,
}

impl Default for Producer {
    fn default() -> Self {
        Self {
            name: PRODUCER_NAME.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// One analyzed run as it appears in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Heater or RF run.
    pub kind: RunKind,
    /// First sample index, inclusive.
    pub start_idx: usize,
    /// Last sample index, exclusive.
    pub end_idx: usize,
    /// Samples in the run.
    pub samples: usize,
    /// Covered time in seconds.
    pub duration_secs: f64,
    /// Desired heater delta against the reference, in watts.
    pub heater_delta_des: f64,
    /// Measured heater delta against the reference, in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_delta_act: Option<f64>,
    /// Seconds trimmed from the run start for settling.
    pub settle_cutoff_secs: f64,
    /// Fitted dLL/dt in percent per second.
    pub slope: f64,
    /// Fitted level at the run start, in percent.
    pub intercept: f64,
    /// Coefficient of determination of the fit.
    pub r_squared: f64,
}

impl RunRecord {
    /// Build a record entry from a fitted run.
    ///
    /// Duration comes from the session's constant sampling interval.
    pub fn from_run(run: &Run, sample_interval_secs: u32) -> Self {
        let fit = run.fit.unwrap_or(LinearFit {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
        });
        let samples = run.sample_count();
        Self {
            kind: run.kind,
            start_idx: run.start_idx,
            end_idx: run.end_idx,
            samples,
            duration_secs: samples.saturating_sub(1) as f64 * sample_interval_secs as f64,
            heater_delta_des: run.heater_delta_des,
            heater_delta_act: run.heater_delta_act,
            settle_cutoff_secs: run.settle_cutoff_secs,
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
        }
    }
}

/// Persisted result of a heater calibration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Record format version.
    pub record_version: String,
    /// Unique identity of this record.
    pub record_id: Uuid,
    /// When the record was produced.
    pub produced_at: DateTime<Utc>,
    /// Software that produced the record.
    pub producer: Producer,
    /// Session metadata.
    pub meta: SessionMeta,
    /// Reference operating point.
    pub reference: ReferenceParams,
    /// Calibration slope in percent per second per watt.
    pub slope: f64,
    /// Calibration intercept in percent per second.
    pub intercept: f64,
    /// Coefficient of determination of the calibration fit.
    pub r_squared: f64,
    /// Heat adjustment in watts.
    pub heat_adjustment: f64,
    /// Fitted calibration points.
    pub points: Vec<CalibrationPoint>,
    /// The heater runs behind the fit.
    pub runs: Vec<RunRecord>,
    /// Session diagnostic counters.
    pub counters: SessionCounters,
}

impl CalibrationRecord {
    /// Build a record from a completed calibration session.
    pub fn from_outcome(outcome: &CalibrationOutcome) -> Self {
        Self {
            record_version: RECORD_VERSION.to_string(),
            record_id: Uuid::new_v4(),
            produced_at: Utc::now(),
            producer: Producer::default(),
            meta: outcome.meta.clone(),
            reference: outcome.reference,
            slope: outcome.model.slope,
            intercept: outcome.model.intercept,
            r_squared: outcome.model.r_squared,
            heat_adjustment: outcome.model.heat_adjustment,
            points: outcome.model.points.clone(),
            runs: outcome
                .runs
                .iter()
                .map(|r| RunRecord::from_run(r, outcome.meta.sample_interval_secs))
                .collect(),
            counters: outcome.counters,
        }
    }

    /// Reconstruct the calibration model carried by this record.
    pub fn model(&self) -> CalibrationModel {
        CalibrationModel {
            slope: self.slope,
            intercept: self.intercept,
            r_squared: self.r_squared,
            heat_adjustment: self.heat_adjustment,
            points: self.points.clone(),
        }
    }

    /// Write the record into `dir` with a timestamped filename.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let filename = format!(
            "calibration_{}_{}.json",
            self.meta.cryomodule,
            self.produced_at.format("%Y%m%d_%H%M%S")
        );
        write_record(dir, &filename, self)
    }

    /// Load a record from disk.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        read_record(path)
    }
}

/// One RF run's estimate inside a Q0 record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Q0RunResult {
    /// Index into the record's run list.
    pub run_index: usize,
    /// The estimate for that run.
    pub estimate: Q0Estimate,
}

/// Persisted result of an RF measurement session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Q0Record {
    /// Record format version.
    pub record_version: String,
    /// Unique identity of this record.
    pub record_id: Uuid,
    /// Identity of the calibration record this session used, when it came
    /// from a persisted record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_id: Option<Uuid>,
    /// When the record was produced.
    pub produced_at: DateTime<Utc>,
    /// Software that produced the record.
    pub producer: Producer,
    /// Session metadata.
    pub meta: SessionMeta,
    /// Reference operating point.
    pub reference: ReferenceParams,
    /// Reference cavity gradient in MV/m.
    pub reference_gradient: f64,
    /// Mean Q0 across the estimated RF runs.
    pub session_q0: f64,
    /// Every surviving run of the session.
    pub runs: Vec<RunRecord>,
    /// Per-RF-run estimates.
    pub results: Vec<Q0RunResult>,
    /// Session diagnostic counters.
    pub counters: SessionCounters,
}

impl Q0Record {
    /// Build a record from a completed RF session.
    pub fn from_outcome(outcome: &Q0Outcome, calibration_id: Option<Uuid>) -> Self {
        Self {
            record_version: RECORD_VERSION.to_string(),
            record_id: Uuid::new_v4(),
            calibration_id,
            produced_at: Utc::now(),
            producer: Producer::default(),
            meta: outcome.meta.clone(),
            reference: outcome.reference,
            reference_gradient: outcome.reference_gradient,
            session_q0: outcome.session_q0,
            runs: outcome
                .runs
                .iter()
                .map(|r| RunRecord::from_run(r, outcome.meta.sample_interval_secs))
                .collect(),
            results: outcome
                .estimates
                .iter()
                .map(|(run_index, estimate)| Q0RunResult {
                    run_index: *run_index,
                    estimate: estimate.clone(),
                })
                .collect(),
            counters: outcome.counters,
        }
    }

    /// Write the record into `dir` with a timestamped filename.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let filename = format!(
            "q0_{}_{}.json",
            self.meta.cryomodule,
            self.produced_at.format("%Y%m%d_%H%M%S")
        );
        write_record(dir, &filename, self)
    }

    /// Load a record from disk.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        read_record(path)
    }
}

fn write_record<T: Serialize>(dir: &Path, filename: &str, record: &T) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(dir).map_err(|e| ReportError::IoError(e.to_string()))?;
    let path = dir.join(filename);
    let content = serde_json::to_string_pretty(record)
        .map_err(|e| ReportError::SerializeError(e.to_string()))?;
    std::fs::write(&path, content).map_err(|e| ReportError::IoError(e.to_string()))?;
    Ok(path)
}

fn read_record<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ReportError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ReportError::IoError(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| ReportError::ParseError(e.to_string()))
}

/// Record persistence errors.
#[derive(Debug)]
pub enum ReportError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::IoError(e) => write!(f, "IO error: {e}"),
            ReportError::ParseError(e) => write!(f, "Parse error: {e}"),
            ReportError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ReportError {}
