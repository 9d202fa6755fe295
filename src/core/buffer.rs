//! Aligned signal buffers for archived process-variable data.
//!
//! A `SignalBuffer` holds the per-sample series a measurement session needs:
//! timestamps, downstream liquid level, electric heater setpoint and
//! readback, JT valve position, and (for RF sessions) cavity amplitude and
//! helium vapor pressure. All series share one length and one index space;
//! runs reference slices of this buffer by index.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

/// One raw sample row as read from an archive export.
///
/// Fields are `None` when the archived value was absent or unparseable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalRow {
    /// Unix timestamp in seconds.
    pub timestamp: Option<f64>,
    /// Downstream liquid helium level in percent.
    pub liquid_level: Option<f64>,
    /// Desired electric heater load in watts.
    pub heater_setpoint: Option<f64>,
    /// Measured electric heater load in watts.
    pub heater_readback: Option<f64>,
    /// JT valve position in percent open.
    pub valve_position: Option<f64>,
    /// Cavity amplitude in MV/m. Only required for RF sessions.
    pub amplitude: Option<f64>,
    /// Helium vapor pressure in Torr. Only required for RF sessions.
    pub pressure: Option<f64>,
}

/// Aligned, chronological signal series for one measurement session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBuffer {
    /// Unix timestamps in seconds, strictly increasing.
    pub timestamps: Vec<f64>,
    /// Downstream liquid helium level in percent.
    pub liquid_level: Vec<f64>,
    /// Desired electric heater load in watts.
    pub heater_setpoint: Vec<f64>,
    /// Measured electric heater load in watts.
    pub heater_readback: Vec<f64>,
    /// JT valve position in percent open.
    pub valve_position: Vec<f64>,
    /// Cavity amplitude in MV/m, present for RF sessions.
    pub amplitude: Option<Vec<f64>>,
    /// Helium vapor pressure in Torr, present for RF sessions.
    pub pressure: Option<Vec<f64>>,
    /// Rows dropped during ingestion for missing or unusable values.
    pub dropped_samples: u32,
}

impl SignalBuffer {
    /// Number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// True when the buffer carries amplitude and pressure series.
    pub fn has_rf_signals(&self) -> bool {
        self.amplitude.is_some() && self.pressure.is_some()
    }

    /// Amplitude at `idx`, if an amplitude series exists.
    pub fn amplitude_at(&self, idx: usize) -> Option<f64> {
        self.amplitude.as_ref().and_then(|a| a.get(idx).copied())
    }

    /// Pressure at `idx`, if a pressure series exists.
    pub fn pressure_at(&self, idx: usize) -> Option<f64> {
        self.pressure.as_ref().and_then(|p| p.get(idx).copied())
    }

    /// Total covered time in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        self.timestamps[self.timestamps.len() - 1] - self.timestamps[0]
    }

    /// Apply a centered median filter to the liquid-level series.
    ///
    /// Archived level readings carry sensor noise that would leak into the
    /// dLL/dt fits; a median filter knocks out spikes without lagging the
    /// trend. The window is forced odd and shrinks at the series edges
    /// rather than padding, so boundary values are not pulled toward zero.
    pub fn smooth_liquid_level(&mut self, window: usize) {
        if window < 2 || self.liquid_level.len() < 2 {
            return;
        }
        let window = if window % 2 == 0 { window + 1 } else { window };
        let half = window / 2;
        let raw = self.liquid_level.clone();
        for i in 0..raw.len() {
            let lo = i.saturating_sub(half);
            let hi = usize::min(i + half + 1, raw.len());
            let mut neighborhood = Data::new(raw[lo..hi].to_vec());
            self.liquid_level[i] = neighborhood.median();
        }
    }
}

/// Accumulates raw sample rows into a `SignalBuffer`.
///
/// Rows with a missing or non-finite required value are dropped and
/// counted; they never abort ingestion. Timestamps must increase, so a
/// stale or duplicated archive row is dropped the same way.
#[derive(Debug, Default)]
pub struct SignalBufferBuilder {
    rf_signals: bool,
    timestamps: Vec<f64>,
    liquid_level: Vec<f64>,
    heater_setpoint: Vec<f64>,
    heater_readback: Vec<f64>,
    valve_position: Vec<f64>,
    amplitude: Vec<f64>,
    pressure: Vec<f64>,
    dropped: u32,
}

impl SignalBufferBuilder {
    /// Builder for a calibration session buffer (no RF series).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for an RF session buffer; rows must also carry amplitude
    /// and pressure.
    pub fn with_rf_signals() -> Self {
        Self {
            rf_signals: true,
            ..Self::default()
        }
    }

    /// Ingest one row, dropping it if any required value is unusable.
    pub fn push_row(&mut self, row: SignalRow) {
        let required = [
            row.timestamp,
            row.liquid_level,
            row.heater_setpoint,
            row.heater_readback,
            row.valve_position,
        ];
        let usable = |v: Option<f64>| v.map(f64::is_finite).unwrap_or(false);
        if !required.iter().copied().all(usable) {
            self.dropped += 1;
            return;
        }
        if self.rf_signals && !(usable(row.amplitude) && usable(row.pressure)) {
            self.dropped += 1;
            return;
        }
        let ts = row.timestamp.unwrap_or_default();
        if let Some(&last) = self.timestamps.last() {
            if ts <= last {
                self.dropped += 1;
                return;
            }
        }

        self.timestamps.push(ts);
        self.liquid_level.push(row.liquid_level.unwrap_or_default());
        self.heater_setpoint
            .push(row.heater_setpoint.unwrap_or_default());
        self.heater_readback
            .push(row.heater_readback.unwrap_or_default());
        self.valve_position
            .push(row.valve_position.unwrap_or_default());
        if self.rf_signals {
            self.amplitude.push(row.amplitude.unwrap_or_default());
            self.pressure.push(row.pressure.unwrap_or_default());
        }
    }

    /// Rows dropped so far.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Finish ingestion and produce the buffer.
    pub fn build(self) -> SignalBuffer {
        SignalBuffer {
            timestamps: self.timestamps,
            liquid_level: self.liquid_level,
            heater_setpoint: self.heater_setpoint,
            heater_readback: self.heater_readback,
            valve_position: self.valve_position,
            amplitude: if self.rf_signals {
                Some(self.amplitude)
            } else {
                None
            },
            pressure: if self.rf_signals {
                Some(self.pressure)
            } else {
                None
            },
            dropped_samples: self.dropped,
        }
    }
}
