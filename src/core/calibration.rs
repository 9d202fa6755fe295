//! Heater calibration: heat load vs liquid-level decay rate.
//!
//! A calibration sweep steps the electric heaters through known loads and
//! fits each resulting run's dLL/dt. Regressing those slopes against the
//! measured heat-load deltas gives the line that later converts an RF
//! run's observed dLL/dt back into watts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::fit::linear_fit;
use crate::core::segment::Run;
use crate::core::AnalysisError;

/// One heater run's contribution to the calibration curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Measured heat-load delta against the reference, in watts.
    pub heat_load_delta: f64,
    /// The same delta shifted by the model's heat adjustment. This is the
    /// x value the externally visible calibration curve plots.
    pub adjusted_heat_load: f64,
    /// Fitted liquid-level decay rate, in percent per second.
    pub dll_dt: f64,
}

/// Linear map from injected heat to liquid-level decay rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    /// Decay rate per watt, in percent per second per watt.
    pub slope: f64,
    /// Decay rate at zero measured delta.
    pub intercept: f64,
    /// Coefficient of determination of the fit.
    pub r_squared: f64,
    /// Horizontal self-consistency shift applied to heat loads, in watts.
    pub heat_adjustment: f64,
    /// The fitted points, with their adjusted heat loads.
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationModel {
    /// Fit a model from the heater runs of one calibration session.
    ///
    /// Only heater runs that carry both a fit and a measured heat delta
    /// participate. The fit runs over the unadjusted deltas; the heat
    /// adjustment then shifts the x values once, with no refit iteration.
    pub fn from_heater_runs(runs: &[Run]) -> Result<Self, AnalysisError> {
        let usable: Vec<&Run> = runs
            .iter()
            .filter(|r| r.is_heater() && r.fit.is_some() && r.heater_delta_act.is_some())
            .collect();
        if usable.len() < 2 {
            return Err(AnalysisError::InsufficientCalibrationData {
                heater_runs: usable.len(),
            });
        }

        let deltas: Vec<f64> = usable
            .iter()
            .map(|r| r.heater_delta_act.unwrap_or_default())
            .collect();
        let slopes: Vec<f64> = usable
            .iter()
            .map(|r| r.fit.map(|f| f.slope).unwrap_or_default())
            .collect();

        let fit = linear_fit(&deltas, &slopes).map_err(|_| {
            AnalysisError::InsufficientCalibrationData {
                heater_runs: usable.len(),
            }
        })?;
        if fit.slope == 0.0 {
            // A flat response line cannot convert dLL/dt back to watts.
            return Err(AnalysisError::InsufficientCalibrationData {
                heater_runs: usable.len(),
            });
        }

        let heat_adjustment = -fit.intercept / fit.slope;
        let points = deltas
            .iter()
            .zip(&slopes)
            .map(|(&delta, &dll_dt)| CalibrationPoint {
                heat_load_delta: delta,
                adjusted_heat_load: delta + heat_adjustment,
                dll_dt,
            })
            .collect();

        debug!(
            "calibration: slope {:.6} %/s/W, intercept {:.6}, adjustment {:+.3} W, R^2 {:.4}",
            fit.slope, fit.intercept, heat_adjustment, fit.r_squared
        );
        Ok(Self {
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            heat_adjustment,
            points,
        })
    }

    /// Convert an observed decay rate back into a total heat load in
    /// watts.
    pub fn projected_heat(&self, dll_dt: f64) -> f64 {
        dll_dt / self.slope
    }
}
