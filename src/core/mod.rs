//! Core analysis pipeline for Q0 measurements.
//!
//! This module contains:
//! - Signal buffers holding aligned archived process-variable series
//! - Run segmentation at stable operating conditions
//! - Settle filtering after heat-load changes
//! - Linear fitting of liquid-level decay slopes
//! - Heater calibration models and Q0 estimation

pub mod buffer;
pub mod calibration;
pub mod fit;
pub mod q0;
pub mod segment;
pub mod settle;

// Re-export commonly used types
pub use buffer::{SignalBuffer, SignalBufferBuilder, SignalRow};
pub use calibration::{CalibrationModel, CalibrationPoint};
pub use fit::{fit_run, linear_fit, LinearFit};
pub use q0::{calc_q0, Q0Estimate, Q0Estimator};
pub use segment::{ReferenceParams, Run, RunKind, RunSegmenter, Segmentation, SessionKind};
pub use settle::{approx_heat_from_gradient, SettleFilter};

/// Errors raised by the analysis pipeline.
///
/// Recoverable conditions (dropped samples, short runs, per-sample gradient
/// fallbacks) are counted rather than raised; these variants cover the
/// failures a caller must handle.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// A run had too few samples left to analyze, usually after settling.
    RunTooShort { samples: usize },
    /// A linear fit was attempted over fewer than 2 distinct x values.
    DegenerateFit { points: usize },
    /// A calibration needs at least 2 usable heater runs with distinct
    /// heat loads.
    InsufficientCalibrationData { heater_runs: usize },
    /// A required signal series was absent from the buffer.
    MissingSignal { name: &'static str },
    /// Every sample in an RF run was excluded from the Q0 average.
    NoUsableSamples,
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::RunTooShort { samples } => {
                write!(f, "run too short to analyze ({} samples)", samples)
            }
            AnalysisError::DegenerateFit { points } => {
                write!(f, "degenerate fit: {} distinct points", points)
            }
            AnalysisError::InsufficientCalibrationData { heater_runs } => {
                write!(
                    f,
                    "insufficient calibration data: {} usable heater runs",
                    heater_runs
                )
            }
            AnalysisError::MissingSignal { name } => {
                write!(f, "missing signal series: {}", name)
            }
            AnalysisError::NoUsableSamples => {
                write!(f, "no usable samples for Q0 average")
            }
        }
    }
}

impl std::error::Error for AnalysisError {}
