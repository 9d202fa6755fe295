//! Session pipelines from raw buffer to calibration or Q0 results.
//!
//! A session owns its buffer and drives the pipeline once: smooth the
//! liquid level, segment into runs, settle, fit, then either build the
//! calibration model or estimate Q0 for each RF run. Recoverable losses
//! along the way land in the session counters; a session either completes
//! whole or fails with a typed error.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::core::buffer::SignalBuffer;
use crate::core::calibration::CalibrationModel;
use crate::core::fit::fit_run;
use crate::core::q0::{Q0Estimate, Q0Estimator};
use crate::core::segment::{ReferenceParams, Run, RunSegmenter, SessionKind};
use crate::core::settle::SettleFilter;
use crate::core::AnalysisError;
use crate::session::types::SessionMeta;

/// Per-session diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Rows dropped while building the signal buffer.
    pub samples_dropped: u32,
    /// Run candidates below the minimum duration.
    pub short_runs_discarded: u32,
    /// Runs consumed entirely by settle trimming.
    pub settle_runs_discarded: u32,
    /// Runs whose liquid-level fit failed.
    pub fits_failed: u32,
    /// RF runs whose Q0 estimate failed.
    pub estimates_failed: u32,
}

/// Result of processing one calibration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    /// Session metadata.
    pub meta: SessionMeta,
    /// Reference operating point.
    pub reference: ReferenceParams,
    /// The fitted calibration model.
    pub model: CalibrationModel,
    /// Surviving fitted heater runs.
    pub runs: Vec<Run>,
    /// Diagnostic counters.
    pub counters: SessionCounters,
}

/// Result of processing one RF session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Q0Outcome {
    /// Session metadata.
    pub meta: SessionMeta,
    /// Reference operating point.
    pub reference: ReferenceParams,
    /// Reference cavity gradient in MV/m.
    pub reference_gradient: f64,
    /// Surviving fitted runs, heater and RF.
    pub runs: Vec<Run>,
    /// Q0 estimates, each paired with its run's index into `runs`.
    pub estimates: Vec<(usize, Q0Estimate)>,
    /// Mean Q0 across the estimated RF runs.
    pub session_q0: f64,
    /// Diagnostic counters.
    pub counters: SessionCounters,
}

/// One-shot pipeline for a heater calibration session.
pub struct CalibrationSession {
    meta: SessionMeta,
    reference: ReferenceParams,
    buffer: SignalBuffer,
    config: AnalysisConfig,
}

impl CalibrationSession {
    /// Create a session over an assembled buffer.
    pub fn new(
        meta: SessionMeta,
        reference: ReferenceParams,
        buffer: SignalBuffer,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            meta,
            reference,
            buffer,
            config,
        }
    }

    /// Run the pipeline and fit the calibration model.
    pub fn process(mut self) -> Result<CalibrationOutcome, AnalysisError> {
        let mut counters = SessionCounters {
            samples_dropped: self.buffer.dropped_samples,
            ..SessionCounters::default()
        };
        self.buffer
            .smooth_liquid_level(self.config.thresholds.level_median_window);

        let mut segmentation = RunSegmenter::new(
            &self.buffer,
            self.reference,
            self.config.thresholds.clone(),
            SessionKind::Calibration,
        )
        .segment();
        counters.short_runs_discarded = segmentation.discarded_short;

        counters.settle_runs_discarded = SettleFilter::new(self.config.settle).apply(
            &self.buffer,
            self.reference,
            SessionKind::Calibration,
            &mut segmentation.runs,
        );

        let runs = fit_all(&self.buffer, segmentation.runs, self.reference, &mut counters);
        let model = CalibrationModel::from_heater_runs(&runs)?;
        info!(
            "calibration {}: {} heater runs, slope {:.6} %/s/W, R^2 {:.4}",
            self.meta.label(),
            runs.len(),
            model.slope,
            model.r_squared
        );
        Ok(CalibrationOutcome {
            meta: self.meta,
            reference: self.reference,
            model,
            runs,
            counters,
        })
    }
}

/// One-shot pipeline for an RF measurement session.
pub struct Q0Session {
    meta: SessionMeta,
    reference: ReferenceParams,
    reference_gradient: f64,
    buffer: SignalBuffer,
    calibration: CalibrationModel,
    config: AnalysisConfig,
}

impl Q0Session {
    /// Create a session over an assembled buffer and a previously fitted
    /// calibration model.
    pub fn new(
        meta: SessionMeta,
        reference: ReferenceParams,
        reference_gradient: f64,
        buffer: SignalBuffer,
        calibration: CalibrationModel,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            meta,
            reference,
            reference_gradient,
            buffer,
            calibration,
            config,
        }
    }

    /// Run the pipeline and estimate Q0 for every RF run.
    pub fn process(mut self) -> Result<Q0Outcome, AnalysisError> {
        let mut counters = SessionCounters {
            samples_dropped: self.buffer.dropped_samples,
            ..SessionCounters::default()
        };
        self.buffer
            .smooth_liquid_level(self.config.thresholds.level_median_window);

        let mut segmentation = RunSegmenter::new(
            &self.buffer,
            self.reference,
            self.config.thresholds.clone(),
            SessionKind::Q0,
        )
        .segment();
        counters.short_runs_discarded = segmentation.discarded_short;

        counters.settle_runs_discarded = SettleFilter::new(self.config.settle).apply(
            &self.buffer,
            self.reference,
            SessionKind::Q0,
            &mut segmentation.runs,
        );

        let runs = fit_all(&self.buffer, segmentation.runs, self.reference, &mut counters);

        let estimator = Q0Estimator::new(
            &self.buffer,
            &self.calibration,
            self.reference_gradient,
            self.config.physics,
        );
        let mut estimates = Vec::new();
        for (i, run) in runs.iter().enumerate() {
            if !run.is_rf() {
                continue;
            }
            match estimator.estimate(run, &runs) {
                Ok(estimate) => estimates.push((i, estimate)),
                Err(e) => {
                    counters.estimates_failed += 1;
                    debug!("dropping RF run [{}, {}): {}", run.start_idx, run.end_idx, e);
                }
            }
        }
        if estimates.is_empty() {
            return Err(AnalysisError::NoUsableSamples);
        }
        let q0s: Vec<f64> = estimates.iter().map(|(_, e)| e.q0).collect();
        let session_q0 = q0s.mean();
        info!(
            "Q0 session {}: {} RF runs, mean Q0 {:.3e}",
            self.meta.label(),
            estimates.len(),
            session_q0
        );
        Ok(Q0Outcome {
            meta: self.meta,
            reference: self.reference,
            reference_gradient: self.reference_gradient,
            runs,
            estimates,
            session_q0,
            counters,
        })
    }
}

/// Fit every run, keeping the ones that fit and counting the rest.
fn fit_all(
    buffer: &SignalBuffer,
    runs: Vec<Run>,
    reference: ReferenceParams,
    counters: &mut SessionCounters,
) -> Vec<Run> {
    let mut fitted = Vec::with_capacity(runs.len());
    for mut run in runs {
        match fit_run(buffer, &mut run, reference) {
            Ok(()) => fitted.push(run),
            Err(e) => {
                counters.fits_failed += 1;
                debug!("dropping run [{}, {}): {}", run.start_idx, run.end_idx, e);
            }
        }
    }
    fitted
}
