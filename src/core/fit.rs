//! Ordinary least squares fitting of liquid-level decay.
//!
//! Each settled run gets a straight-line fit of downstream liquid level
//! against elapsed time; the slope (dLL/dt, percent per second) is the
//! quantity everything downstream consumes.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use crate::core::buffer::SignalBuffer;
use crate::core::segment::{ReferenceParams, Run};
use crate::core::AnalysisError;

/// Result of a straight-line fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// Fitted slope.
    pub slope: f64,
    /// Fitted intercept.
    pub intercept: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
}

/// Fit `ys = intercept + slope * xs` by ordinary least squares.
///
/// Needs at least 2 points with distinct x values. A constant `ys` series
/// fits exactly, so its R^2 reports 1.0.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Result<LinearFit, AnalysisError> {
    let n = xs.len();
    if n < 2 || ys.len() != n {
        return Err(AnalysisError::DegenerateFit { points: n.min(ys.len()) });
    }

    let mean_x = xs.mean();
    let mean_y = ys.mean();
    let mut ss_xx = 0.0;
    let mut ss_xy = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        ss_xx += dx * dx;
        ss_xy += dx * (y - mean_y);
    }
    if ss_xx == 0.0 {
        return Err(AnalysisError::DegenerateFit { points: 1 });
    }

    let slope = ss_xy / ss_xx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let predicted = intercept + slope * x;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Fit a run's liquid-level decay and fill in its measured heat delta.
///
/// Times are taken relative to the run start, so the intercept reads as
/// the level when the run began. The mean heater readback over the run
/// minus the reference load becomes `heater_delta_act`.
pub fn fit_run(
    buffer: &SignalBuffer,
    run: &mut Run,
    reference: ReferenceParams,
) -> Result<(), AnalysisError> {
    let samples = run.sample_count();
    if samples < 2 {
        return Err(AnalysisError::RunTooShort { samples });
    }

    let start_time = buffer.timestamps[run.start_idx];
    let xs: Vec<f64> = buffer.timestamps[run.start_idx..run.end_idx]
        .iter()
        .map(|t| t - start_time)
        .collect();
    let ys = &buffer.liquid_level[run.start_idx..run.end_idx];

    let fit = linear_fit(&xs, ys)?;
    let mean_readback = buffer.heater_readback[run.start_idx..run.end_idx].mean();
    run.heater_delta_act = Some(mean_readback - reference.heat_load_act);
    debug!(
        "fit run [{}, {}): dLL/dt {:.6} %/s, R^2 {:.4}",
        run.start_idx, run.end_idx, fit.slope, fit.r_squared
    );
    run.fit = Some(fit);
    Ok(())
}
