//! Settle filtering after heat-load changes.
//!
//! When the injected heat changes, the liquid-level response takes time to
//! reach its new steady slope. Each run therefore loses an initial stretch
//! proportional to the size of the heat step that preceded it before any
//! fitting happens.

use tracing::debug;

use crate::config::SettleParams;
use crate::core::buffer::SignalBuffer;
use crate::core::segment::{ReferenceParams, Run, SessionKind};

/// Gradient at which the cavity dissipates `DESIGN_GRADIENT_HEAT`, in MV/m.
const DESIGN_GRADIENT: f64 = 16.0;

/// RF heat load at the design gradient and design Q0, in watts.
const DESIGN_GRADIENT_HEAT: f64 = 9.6;

/// Modeled RF heat for a cavity amplitude, in watts.
///
/// Scales quadratically from the design point. Amplitude readbacks can go
/// slightly negative around zero; anything non-positive contributes no
/// heat.
pub fn approx_heat_from_gradient(gradient: f64) -> f64 {
    if gradient > 0.0 {
        (gradient / DESIGN_GRADIENT).powi(2) * DESIGN_GRADIENT_HEAT
    } else {
        0.0
    }
}

/// Trims the start of each run to skip the cryo settle period.
pub struct SettleFilter {
    params: SettleParams,
}

impl SettleFilter {
    /// Create a filter with the given settle parameters.
    pub fn new(params: SettleParams) -> Self {
        Self { params }
    }

    /// Advance every run's start index past its settle period.
    ///
    /// The cutoff is `max(0, round(|heat delta| * seconds_per_watt) -
    /// already_waited)`. The first run's delta is measured against the
    /// reference parameters; later runs telescope against the previous
    /// run's starting conditions. For RF sessions the modeled gradient
    /// heat joins the electric heater delta.
    ///
    /// Runs left with fewer than 2 samples, or whose cutoff exceeds their
    /// span, are removed. Returns how many were removed.
    pub fn apply(
        &self,
        buffer: &SignalBuffer,
        reference: ReferenceParams,
        kind: SessionKind,
        runs: &mut Vec<Run>,
    ) -> u32 {
        let mut exhausted = vec![false; runs.len()];
        for i in 0..runs.len() {
            let delta = self.total_heat_delta(buffer, reference, kind, runs, i);
            let cutoff = ((delta.abs() * self.params.seconds_per_watt).round()
                - self.params.already_waited_secs)
                .max(0.0);

            let run = &mut runs[i];
            run.settle_cutoff_secs = cutoff;
            if run.sample_count() == 0 {
                exhausted[i] = true;
                continue;
            }

            let mut idx = run.start_idx;
            let start_time = buffer.timestamps[idx];
            while buffer.timestamps[idx] - start_time < cutoff && idx < run.end_idx - 1 {
                idx += 1;
            }
            let settled = buffer.timestamps[idx] - start_time >= cutoff;
            debug!(
                "run [{}, {}): heat delta {:+.2} W, settle cutoff {:.0}s, start {} -> {}",
                run.start_idx, run.end_idx, delta, cutoff, run.start_idx, idx
            );
            run.start_idx = idx;
            if !settled || run.sample_count() < 2 {
                debug!("run [{}, {}) consumed by settling, dropping", idx, run.end_idx);
                exhausted[i] = true;
            }
        }

        let mut i = 0;
        runs.retain(|_| {
            let keep = !exhausted[i];
            i += 1;
            keep
        });
        exhausted.iter().filter(|&&e| e).count() as u32
    }

    /// Heat delta that preceded run `i`, in watts, signed.
    fn total_heat_delta(
        &self,
        buffer: &SignalBuffer,
        reference: ReferenceParams,
        kind: SessionKind,
        runs: &[Run],
        i: usize,
    ) -> f64 {
        let gradient_heat = |idx: usize| -> f64 {
            if kind == SessionKind::Q0 {
                buffer
                    .amplitude_at(idx)
                    .map(approx_heat_from_gradient)
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };
        let start = runs[i].start_idx;
        if i == 0 {
            buffer.heater_setpoint[start] - reference.heat_load_des + gradient_heat(start)
        } else {
            let prev = runs[i - 1].start_idx;
            (buffer.heater_setpoint[start] - buffer.heater_setpoint[prev])
                + (gradient_heat(start) - gradient_heat(prev))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::segment::RunKind;

    fn params() -> SettleParams {
        SettleParams {
            seconds_per_watt: 25.0,
            already_waited_secs: 30.0,
        }
    }

    fn reference() -> ReferenceParams {
        ReferenceParams {
            valve_position: 40.0,
            heat_load_des: 0.0,
            heat_load_act: 0.0,
        }
    }

    fn buffer_with_setpoints(setpoints: Vec<f64>) -> SignalBuffer {
        let n = setpoints.len();
        SignalBuffer {
            timestamps: (0..n).map(|i| i as f64).collect(),
            liquid_level: vec![92.0; n],
            heater_readback: setpoints.clone(),
            heater_setpoint: setpoints,
            valve_position: vec![40.0; n],
            amplitude: None,
            pressure: None,
            dropped_samples: 0,
        }
    }

    fn run(start: usize, end: usize) -> Run {
        Run {
            kind: RunKind::Heater,
            start_idx: start,
            end_idx: end,
            heater_delta_des: 0.0,
            heater_delta_act: None,
            settle_cutoff_secs: 0.0,
            fit: None,
        }
    }

    #[test]
    fn test_gradient_heat_model() {
        assert!((approx_heat_from_gradient(16.0) - 9.6).abs() < 1e-12);
        assert!((approx_heat_from_gradient(8.0) - 2.4).abs() < 1e-12);
        assert_eq!(approx_heat_from_gradient(0.0), 0.0);
        assert_eq!(approx_heat_from_gradient(-5.0), 0.0);
    }

    #[test]
    fn test_zero_delta_leaves_run_untouched() {
        let buffer = buffer_with_setpoints(vec![0.0; 100]);
        let mut runs = vec![run(0, 90)];
        let dropped =
            SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);

        assert_eq!(dropped, 0);
        assert_eq!(runs[0].start_idx, 0);
        assert_eq!(runs[0].settle_cutoff_secs, 0.0);
    }

    #[test]
    fn test_cutoff_grows_with_delta() {
        // 2 W -> 20s, 4 W -> 70s, 8 W -> 170s
        for (watts, expected) in [(2.0, 20.0), (4.0, 70.0), (8.0, 170.0)] {
            let buffer = buffer_with_setpoints(vec![watts; 400]);
            let mut runs = vec![run(0, 395)];
            SettleFilter::new(params()).apply(
                &buffer,
                reference(),
                SessionKind::Calibration,
                &mut runs,
            );
            assert_eq!(runs[0].settle_cutoff_secs, expected);
            assert_eq!(runs[0].start_idx, expected as usize);
        }
    }

    #[test]
    fn test_cutoff_clamped_at_zero() {
        // 1 W settles in 25s, less than the 30s already waited
        let buffer = buffer_with_setpoints(vec![1.0; 50]);
        let mut runs = vec![run(0, 45)];
        SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);
        assert_eq!(runs[0].settle_cutoff_secs, 0.0);
        assert_eq!(runs[0].start_idx, 0);
    }

    #[test]
    fn test_negative_delta_still_settles() {
        let buffer = buffer_with_setpoints(vec![-8.0; 400]);
        let mut runs = vec![run(0, 395)];
        SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);
        assert_eq!(runs[0].settle_cutoff_secs, 170.0);
    }

    #[test]
    fn test_run_consumed_by_settling_is_dropped() {
        // 8 W needs 170s but the run only spans 50s
        let buffer = buffer_with_setpoints(vec![8.0; 60]);
        let mut runs = vec![run(0, 50)];
        let dropped =
            SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);

        assert_eq!(dropped, 1);
        assert!(runs.is_empty());
    }

    #[test]
    fn test_telescoping_delta_between_runs() {
        // 8 W then 16 W: the second run settles for the 8 W step, not 16
        let mut setpoints = vec![8.0; 400];
        setpoints.extend(vec![16.0; 400]);
        let buffer = buffer_with_setpoints(setpoints);
        let mut runs = vec![run(0, 399), run(400, 795)];
        SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);

        assert_eq!(runs[0].settle_cutoff_secs, 170.0);
        assert_eq!(runs[1].settle_cutoff_secs, 170.0);
        assert_eq!(runs[1].start_idx, 570);
    }

    #[test]
    fn test_rf_session_adds_gradient_heat() {
        // No heater step, amplitude at the design gradient: delta 9.6 W,
        // cutoff round(9.6 * 25) - 30 = 210
        let mut buffer = buffer_with_setpoints(vec![0.0; 400]);
        buffer.amplitude = Some(vec![16.0; 400]);
        buffer.pressure = Some(vec![23.6; 400]);
        let mut runs = vec![run(0, 395)];
        SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Q0, &mut runs);

        assert_eq!(runs[0].settle_cutoff_secs, 210.0);
        assert_eq!(runs[0].start_idx, 210);
    }

    #[test]
    fn test_calibration_session_ignores_amplitude() {
        let mut buffer = buffer_with_setpoints(vec![0.0; 100]);
        buffer.amplitude = Some(vec![16.0; 100]);
        buffer.pressure = Some(vec![23.6; 100]);
        let mut runs = vec![run(0, 95)];
        SettleFilter::new(params()).apply(&buffer, reference(), SessionKind::Calibration, &mut runs);

        assert_eq!(runs[0].settle_cutoff_secs, 0.0);
    }
}
