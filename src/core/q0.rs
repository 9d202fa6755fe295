//! Q0 estimation for RF runs.
//!
//! An RF run's liquid-level slope is projected through the heater
//! calibration to get the total heat load, the electrically delivered part
//! is subtracted, and the remaining RF heat load feeds the closed-form Q0
//! expression sample by sample.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::config::PhysicsParams;
use crate::core::buffer::SignalBuffer;
use crate::core::calibration::CalibrationModel;
use crate::core::segment::Run;
use crate::core::AnalysisError;

/// Helium bath temperature rise per Torr of vapor pressure, in K.
const TEMP_PER_TORR: f64 = 0.0125;

/// Helium bath temperature at zero vapor pressure, in K.
const TEMP_OFFSET_K: f64 = 1.705;

/// Bath temperature the correction normalizes to, in K.
const REFERENCE_TEMP_K: f64 = 2.0;

/// Amplitude offset in the field-dependent surface-resistance term.
const GRADIENT_OFFSET: f64 = 0.7;

/// Compute a single Q0 value from an amplitude sample, the run's RF heat
/// load, and a pressure sample.
///
/// The raw quality factor follows from the cavity voltage and R/Q; the
/// correction term rescales it from the measured bath temperature to the
/// 2 K reference. At a pressure that puts the bath at exactly 2 K the
/// correction vanishes.
pub fn calc_q0(
    amplitude: f64,
    rf_heat_load: f64,
    pressure_torr: f64,
    physics: &PhysicsParams,
) -> f64 {
    let uncorrected = (amplitude * 1e6).powi(2) / (physics.r_over_q * rf_heat_load);
    let temperature = pressure_torr * TEMP_PER_TORR + TEMP_OFFSET_K;
    let g = amplitude - GRADIENT_OFFSET;
    let c7 = physics.c2 - physics.c3 * g + physics.c5 * g * g;

    physics.c1
        / ((c7 / REFERENCE_TEMP_K) * (physics.c6 / REFERENCE_TEMP_K).exp()
            + physics.c1 / uncorrected
            - (c7 / temperature) * (physics.c6 / temperature).exp())
}

/// Result of estimating Q0 over one RF run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Q0Estimate {
    /// Total heat load projected through the calibration, in watts.
    pub projected_heat: f64,
    /// Average heat adjustment from co-located heater runs, in watts.
    pub avg_heat_adjustment: f64,
    /// Electrical heat actually delivered during the run, in watts.
    pub electrical_heat: f64,
    /// Heat attributed to the RF field, in watts.
    pub rf_heat_load: f64,
    /// Mean of the per-sample Q0 values.
    pub q0: f64,
    /// Samples that contributed to the mean.
    pub samples_used: u32,
    /// Samples whose archived amplitude was replaced by the reference
    /// gradient.
    pub invalid_gradient_samples: u32,
    /// Samples whose Q0 computation degenerated and was excluded.
    pub excluded_samples: u32,
    /// Mean vapor pressure over the run, in Torr.
    pub avg_pressure_torr: f64,
    /// RMS of the archived amplitudes over the run, in MV/m. Fallback
    /// substitutions do not enter this figure, so archiver dropouts pull
    /// it visibly away from the reference gradient.
    pub rms_gradient: f64,
}

/// Computes per-run Q0 estimates against a calibration model.
pub struct Q0Estimator<'a> {
    buffer: &'a SignalBuffer,
    calibration: &'a CalibrationModel,
    reference_gradient: f64,
    physics: PhysicsParams,
}

impl<'a> Q0Estimator<'a> {
    /// Create an estimator for one RF session buffer.
    pub fn new(
        buffer: &'a SignalBuffer,
        calibration: &'a CalibrationModel,
        reference_gradient: f64,
        physics: PhysicsParams,
    ) -> Self {
        Self {
            buffer,
            calibration,
            reference_gradient,
            physics,
        }
    }

    /// Estimate Q0 for a fitted RF run.
    ///
    /// `heater_runs` are the heater runs of the same RF session; their
    /// disagreement with the calibration becomes an averaged heat
    /// adjustment on top of the projected load.
    pub fn estimate(&self, run: &Run, heater_runs: &[Run]) -> Result<Q0Estimate, AnalysisError> {
        let fit = run.fit.ok_or(AnalysisError::DegenerateFit { points: 0 })?;
        let amplitude = self
            .buffer
            .amplitude
            .as_ref()
            .ok_or(AnalysisError::MissingSignal { name: "amplitude" })?;
        let pressure = self
            .buffer
            .pressure
            .as_ref()
            .ok_or(AnalysisError::MissingSignal { name: "pressure" })?;
        if run.sample_count() == 0 {
            return Err(AnalysisError::RunTooShort { samples: 0 });
        }

        let projected_heat = self.calibration.projected_heat(fit.slope);
        let avg_heat_adjustment = self.average_heat_adjustment(heater_runs);
        let electrical_heat = run.heater_delta_act.unwrap_or(0.0);
        let rf_heat_load = projected_heat + avg_heat_adjustment - electrical_heat;
        if !rf_heat_load.is_finite() || rf_heat_load <= 0.0 {
            // Dividing by a non-positive heat load degenerates every sample.
            warn!(
                "run [{}, {}): non-physical RF heat load {:.3} W",
                run.start_idx, run.end_idx, rf_heat_load
            );
            return Err(AnalysisError::NoUsableSamples);
        }

        let mut sum = 0.0;
        let mut sum_sq_gradient = 0.0;
        let mut gradient_samples = 0u32;
        let mut used = 0u32;
        let mut invalid = 0u32;
        let mut excluded = 0u32;
        for idx in run.start_idx..run.end_idx {
            let archived = amplitude[idx];
            if archived.is_finite() {
                sum_sq_gradient += archived * archived;
                gradient_samples += 1;
            }
            let gradient = if archived.is_finite() && archived > 0.0 {
                archived
            } else {
                invalid += 1;
                self.reference_gradient
            };

            let sample_q0 = calc_q0(gradient, rf_heat_load, pressure[idx], &self.physics);
            if sample_q0.is_finite() && sample_q0 > 0.0 {
                sum += sample_q0;
                used += 1;
            } else {
                excluded += 1;
            }
        }
        if invalid > 0 {
            warn!(
                "run [{}, {}): {} amplitude samples replaced by reference gradient {:.2} MV/m",
                run.start_idx, run.end_idx, invalid, self.reference_gradient
            );
        }
        if used == 0 {
            return Err(AnalysisError::NoUsableSamples);
        }

        let rms_gradient = if gradient_samples > 0 {
            (sum_sq_gradient / gradient_samples as f64).sqrt()
        } else {
            0.0
        };
        let estimate = Q0Estimate {
            projected_heat,
            avg_heat_adjustment,
            electrical_heat,
            rf_heat_load,
            q0: sum / used as f64,
            samples_used: used,
            invalid_gradient_samples: invalid,
            excluded_samples: excluded,
            avg_pressure_torr: pressure[run.start_idx..run.end_idx].mean(),
            rms_gradient,
        };
        debug!(
            "run [{}, {}): RF heat {:.2} W, Q0 {:.3e} over {} samples",
            run.start_idx, run.end_idx, estimate.rf_heat_load, estimate.q0, used
        );
        Ok(estimate)
    }

    /// Mean disagreement between the heater runs and the calibration, in
    /// watts. Zero when the session carries no usable heater runs.
    fn average_heat_adjustment(&self, heater_runs: &[Run]) -> f64 {
        let adjustments: Vec<f64> = heater_runs
            .iter()
            .filter(|r| r.is_heater())
            .filter_map(|r| {
                let fit = r.fit?;
                let delta_act = r.heater_delta_act?;
                Some(delta_act - self.calibration.projected_heat(fit.slope))
            })
            .collect();
        if adjustments.is_empty() {
            return 0.0;
        }
        adjustments.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fit::LinearFit;
    use crate::core::segment::RunKind;

    fn physics() -> PhysicsParams {
        PhysicsParams::default()
    }

    fn flat_calibration() -> CalibrationModel {
        CalibrationModel {
            slope: -0.0025,
            intercept: 0.0,
            r_squared: 1.0,
            heat_adjustment: 0.0,
            points: Vec::new(),
        }
    }

    fn rf_buffer(n: usize) -> SignalBuffer {
        SignalBuffer {
            timestamps: (0..n).map(|i| i as f64).collect(),
            liquid_level: (0..n).map(|i| 95.0 - 0.04 * i as f64).collect(),
            heater_setpoint: vec![24.0; n],
            heater_readback: vec![24.0; n],
            valve_position: vec![40.0; n],
            amplitude: Some(vec![16.0; n]),
            pressure: Some(vec![23.6; n]),
            dropped_samples: 0,
        }
    }

    fn rf_run(n: usize, slope: f64) -> Run {
        Run {
            kind: RunKind::Rf,
            start_idx: 0,
            end_idx: n,
            heater_delta_des: 0.0,
            heater_delta_act: Some(0.0),
            settle_cutoff_secs: 0.0,
            fit: Some(LinearFit {
                slope,
                intercept: 95.0,
                r_squared: 1.0,
            }),
        }
    }

    #[test]
    fn test_calc_q0_at_reference_temperature() {
        // 23.6 Torr puts the bath at exactly 2 K, so the correction
        // vanishes and Q0 equals the uncorrected value.
        let q0 = calc_q0(16.0, 9.6, 23.6, &physics());
        let uncorrected = (16.0e6_f64).powi(2) / (1012.0 * 9.6);
        assert!((q0 - uncorrected).abs() / uncorrected < 1e-9);
        assert!(q0 > 1e10 && q0 < 1e11);
    }

    #[test]
    fn test_calc_q0_normalizes_warmer_bath_upward() {
        let at_2k = calc_q0(16.0, 9.6, 23.6, &physics());
        let warmer = calc_q0(16.0, 9.6, 31.6, &physics());
        assert!(warmer > at_2k);
    }

    #[test]
    fn test_calc_q0_negative_heat_load_is_unusable() {
        let q0 = calc_q0(16.0, -9.6, 23.6, &physics());
        assert!(q0 <= 0.0);
    }

    #[test]
    fn test_estimate_pure_rf_run() {
        let n = 600;
        let buffer = rf_buffer(n);
        let calibration = flat_calibration();
        let estimator = Q0Estimator::new(&buffer, &calibration, 16.0, physics());
        let estimate = estimator.estimate(&rf_run(n, -0.04), &[]).unwrap();

        assert!((estimate.projected_heat - 16.0).abs() < 1e-9);
        assert_eq!(estimate.avg_heat_adjustment, 0.0);
        assert!((estimate.rf_heat_load - 16.0).abs() < 1e-9);
        assert_eq!(estimate.samples_used, 600);
        assert_eq!(estimate.invalid_gradient_samples, 0);
        assert_eq!(estimate.excluded_samples, 0);
        assert!((estimate.avg_pressure_torr - 23.6).abs() < 1e-9);
        assert!((estimate.rms_gradient - 16.0).abs() < 1e-9);

        let expected = (16.0e6_f64).powi(2) / (1012.0 * 16.0);
        assert!((estimate.q0 - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn test_estimate_counts_gradient_fallbacks() {
        let n = 100;
        let mut buffer = rf_buffer(n);
        if let Some(amplitude) = buffer.amplitude.as_mut() {
            amplitude[10] = 0.0;
            amplitude[11] = -0.3;
            amplitude[12] = f64::NAN;
        }
        let calibration = flat_calibration();
        let estimator = Q0Estimator::new(&buffer, &calibration, 16.0, physics());
        let estimate = estimator.estimate(&rf_run(n, -0.04), &[]).unwrap();

        assert_eq!(estimate.invalid_gradient_samples, 3);
        assert_eq!(estimate.samples_used, 100);
        // The RMS reflects the archived values, not the substituted
        // reference gradient: the zero and negative samples drag it down
        // and the NaN sample is left out entirely
        let expected_rms = ((97.0 * 256.0 + 0.09) / 99.0_f64).sqrt();
        assert!((estimate.rms_gradient - expected_rms).abs() < 1e-9);
        assert!(estimate.rms_gradient < 16.0);
    }

    #[test]
    fn test_estimate_applies_heater_run_adjustment() {
        let n = 100;
        let buffer = rf_buffer(n);
        let calibration = flat_calibration();
        let heater = Run {
            kind: RunKind::Heater,
            start_idx: 0,
            end_idx: n,
            heater_delta_des: 8.0,
            heater_delta_act: Some(8.0),
            settle_cutoff_secs: 0.0,
            fit: Some(LinearFit {
                slope: -0.018,
                intercept: 95.0,
                r_squared: 1.0,
            }),
        };
        let estimator = Q0Estimator::new(&buffer, &calibration, 16.0, physics());
        let estimate = estimator
            .estimate(&rf_run(n, -0.04), &[heater])
            .unwrap();

        // Heater run projects to 7.2 W against 8 W delivered
        assert!((estimate.avg_heat_adjustment - 0.8).abs() < 1e-9);
        assert!((estimate.rf_heat_load - 16.8).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_requires_rf_signals() {
        let n = 100;
        let mut buffer = rf_buffer(n);
        buffer.amplitude = None;
        let calibration = flat_calibration();
        let estimator = Q0Estimator::new(&buffer, &calibration, 16.0, physics());
        let err = estimator.estimate(&rf_run(n, -0.04), &[]).unwrap_err();
        assert_eq!(err, AnalysisError::MissingSignal { name: "amplitude" });
    }

    #[test]
    fn test_estimate_excludes_degenerate_samples() {
        // Zero RF heat load degenerates every sample
        let n = 50;
        let buffer = rf_buffer(n);
        let calibration = flat_calibration();
        let estimator = Q0Estimator::new(&buffer, &calibration, 16.0, physics());
        let err = estimator.estimate(&rf_run(n, 0.0), &[]).unwrap_err();
        assert_eq!(err, AnalysisError::NoUsableSamples);
    }
}
