//! Run segmentation over archived signal buffers.
//!
//! A "run" is a maximal stretch of samples collected under stable cryo
//! conditions: constant desired heater load, adequate liquid level, JT
//! valve near its reference position, heater readback tracking its
//! setpoint, and (for RF data) steady cavity amplitude. Violating any of
//! these at a sample ends the current candidate run; candidates shorter
//! than the configured minimum duration are discarded.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StabilityThresholds;
use crate::core::buffer::SignalBuffer;
use crate::core::fit::LinearFit;

/// Reference operating point established before data collection.
///
/// The cryo plant is brought to a steady state (valve position locked,
/// heaters at a known load) and all run heat loads are measured as deltas
/// against these values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceParams {
    /// JT valve position in percent open.
    pub valve_position: f64,
    /// Desired electric heater load in watts.
    pub heat_load_des: f64,
    /// Measured electric heater load in watts.
    pub heat_load_act: f64,
}

/// What kind of heat source dominates a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Heat injected by the electric heaters.
    Heater,
    /// Heat dissipated by the cavity RF field.
    Rf,
}

/// What kind of measurement session a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Heater-only calibration sweep; every run is a heater run.
    Calibration,
    /// RF measurement; runs split into heater and RF by their heat delta.
    Q0,
}

/// A contiguous index range `[start_idx, end_idx)` into a `SignalBuffer`
/// collected under stable conditions.
///
/// Created by the segmenter, the start index is moved once by the settle
/// filter and the fit fields are filled once by the fitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Heater or RF run.
    pub kind: RunKind,
    /// First sample index, inclusive.
    pub start_idx: usize,
    /// Last sample index, exclusive.
    pub end_idx: usize,
    /// Desired heater load at the run start minus the reference load, in
    /// watts.
    pub heater_delta_des: f64,
    /// Mean measured heater load over the run minus the reference, in
    /// watts. Filled by the fitter.
    pub heater_delta_act: Option<f64>,
    /// Seconds trimmed from the run start to let the cryo system settle.
    pub settle_cutoff_secs: f64,
    /// Liquid-level decay fit over the settled slice. Filled by the
    /// fitter.
    pub fit: Option<LinearFit>,
}

impl Run {
    /// Number of samples in the run.
    pub fn sample_count(&self) -> usize {
        self.end_idx.saturating_sub(self.start_idx)
    }

    /// Covered time in seconds, first to last contained sample.
    pub fn duration_secs(&self, buffer: &SignalBuffer) -> f64 {
        if self.sample_count() < 2 {
            return 0.0;
        }
        buffer.timestamps[self.end_idx - 1] - buffer.timestamps[self.start_idx]
    }

    /// True for heater runs.
    pub fn is_heater(&self) -> bool {
        self.kind == RunKind::Heater
    }

    /// True for RF runs.
    pub fn is_rf(&self) -> bool {
        self.kind == RunKind::Rf
    }
}

/// Why a candidate run ended at a given sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakReason {
    /// Desired heater load changed from the previous sample.
    HeaterChanged,
    /// Liquid level fell below the minimum.
    LevelTooLow,
    /// JT valve strayed from the reference position.
    ValveOutOfTolerance,
    /// Heater readback disagreed with its setpoint.
    HeaterOutOfTolerance,
    /// Cavity amplitude moved between samples.
    GradientChanged,
}

impl std::fmt::Display for BreakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            BreakReason::HeaterChanged => "heater setpoint changed",
            BreakReason::LevelTooLow => "liquid level too low",
            BreakReason::ValveOutOfTolerance => "valve outside tolerance",
            BreakReason::HeaterOutOfTolerance => "heater readback outside tolerance",
            BreakReason::GradientChanged => "gradient changed",
        };
        write!(f, "{}", text)
    }
}

/// Result of segmenting one buffer.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    /// Emitted runs in chronological order.
    pub runs: Vec<Run>,
    /// Candidates dropped for not meeting the minimum duration.
    pub discarded_short: u32,
}

/// Scans a buffer once and emits runs at stable operating conditions.
pub struct RunSegmenter<'a> {
    buffer: &'a SignalBuffer,
    reference: ReferenceParams,
    thresholds: StabilityThresholds,
    kind: SessionKind,
}

impl<'a> RunSegmenter<'a> {
    /// Create a segmenter over `buffer`.
    pub fn new(
        buffer: &'a SignalBuffer,
        reference: ReferenceParams,
        thresholds: StabilityThresholds,
        kind: SessionKind,
    ) -> Self {
        Self {
            buffer,
            reference,
            thresholds,
            kind,
        }
    }

    /// Partition the buffer into runs.
    ///
    /// A break at index `i` flushes the candidate `[run_start, i - 1)` when
    /// `timestamps[i] - timestamps[run_start]` meets the minimum duration,
    /// and the next candidate starts at `i` either way. The final sample is
    /// an implicit break so trailing data is flushed by the same rule.
    pub fn segment(&self) -> Segmentation {
        let mut segmentation = Segmentation::default();
        let n = self.buffer.len();
        if n == 0 {
            return segmentation;
        }

        let mut run_start = 0usize;
        for i in 0..n {
            let reason = self.break_reason(i);
            let is_last = i == n - 1;
            if reason.is_none() && !is_last {
                continue;
            }
            if let Some(reason) = reason {
                debug!("run break at sample {}: {}", i, reason);
            }
            if i > run_start {
                let duration = self.buffer.timestamps[i] - self.buffer.timestamps[run_start];
                if duration >= self.thresholds.min_run_duration_secs && i - 1 > run_start {
                    segmentation.runs.push(self.make_run(run_start, i - 1));
                } else {
                    debug!(
                        "discarding short candidate [{}, {}): {:.0}s",
                        run_start, i, duration
                    );
                    segmentation.discarded_short += 1;
                }
            }
            run_start = i;
        }
        segmentation
    }

    fn break_reason(&self, idx: usize) -> Option<BreakReason> {
        let b = self.buffer;
        // The first sample counts its predecessor as equal.
        let prev_setpoint = if idx > 0 {
            b.heater_setpoint[idx - 1]
        } else {
            b.heater_setpoint[idx]
        };
        if b.heater_setpoint[idx] != prev_setpoint {
            return Some(BreakReason::HeaterChanged);
        }
        if b.liquid_level[idx] < self.thresholds.min_liquid_level {
            return Some(BreakReason::LevelTooLow);
        }
        if (b.valve_position[idx] - self.reference.valve_position).abs()
            > self.thresholds.valve_position_tolerance
        {
            return Some(BreakReason::ValveOutOfTolerance);
        }
        if (b.heater_setpoint[idx] - b.heater_readback[idx]).abs()
            >= self.thresholds.heater_tolerance_watts
        {
            return Some(BreakReason::HeaterOutOfTolerance);
        }
        if self.kind == SessionKind::Q0 && idx > 0 {
            // A missing or NaN amplitude sample never reads as a change.
            if let (Some(curr), Some(prev)) = (b.amplitude_at(idx), b.amplitude_at(idx - 1)) {
                if (curr - prev).abs() > self.thresholds.gradient_tolerance {
                    return Some(BreakReason::GradientChanged);
                }
            }
        }
        None
    }

    fn make_run(&self, start_idx: usize, end_idx: usize) -> Run {
        let heater_delta_des =
            self.buffer.heater_setpoint[start_idx] - self.reference.heat_load_des;
        let kind = match self.kind {
            SessionKind::Calibration => RunKind::Heater,
            SessionKind::Q0 => {
                if heater_delta_des != 0.0 {
                    RunKind::Heater
                } else {
                    RunKind::Rf
                }
            }
        };
        debug!(
            "emitting {:?} run [{}, {}), heater delta {:+.2} W",
            kind, start_idx, end_idx, heater_delta_des
        );
        Run {
            kind,
            start_idx,
            end_idx,
            heater_delta_des,
            heater_delta_act: None,
            settle_cutoff_secs: 0.0,
            fit: None,
        }
    }
}
