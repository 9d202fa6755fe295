//! Session data files.
//!
//! An archive export lands on disk as one JSON document per session:
//! metadata, the reference operating point, and the raw signal arrays
//! with `null` holding the place of any sample the exporter could not
//! read. RF sessions additionally carry amplitude and pressure arrays
//! and a reference gradient.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::buffer::{SignalBuffer, SignalBufferBuilder, SignalRow};
use crate::core::segment::{ReferenceParams, SessionKind};
use crate::session::types::SessionMeta;

/// One session's raw archived data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    /// Session metadata.
    pub meta: SessionMeta,

    /// Reference operating point for the session.
    pub reference: ReferenceParams,

    /// Reference cavity gradient in MV/m, for RF sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_gradient: Option<f64>,

    /// Unix timestamps in seconds.
    pub timestamps: Vec<Option<f64>>,

    /// Downstream liquid level in percent.
    pub liquid_level: Vec<Option<f64>>,

    /// Desired electric heater load in watts.
    pub heater_setpoint: Vec<Option<f64>>,

    /// Measured electric heater load in watts.
    pub heater_readback: Vec<Option<f64>>,

    /// JT valve position in percent open.
    pub valve_position: Vec<Option<f64>>,

    /// Cavity amplitude in MV/m, present for RF sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<Vec<Option<f64>>>,

    /// Helium vapor pressure in Torr, present for RF sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<Vec<Option<f64>>>,
}

impl SessionFile {
    /// Load a session file from disk.
    pub fn load(path: &Path) -> Result<Self, SessionFileError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SessionFileError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SessionFileError::ParseError(e.to_string()))
    }

    /// Save a session file to disk.
    pub fn save(&self, path: &Path) -> Result<(), SessionFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionFileError::IoError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SessionFileError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SessionFileError::IoError(e.to_string()))
    }

    /// What kind of session this file holds, by which signals it carries.
    pub fn kind(&self) -> SessionKind {
        if self.amplitude.is_some() && self.pressure.is_some() {
            SessionKind::Q0
        } else {
            SessionKind::Calibration
        }
    }

    /// Assemble the aligned signal buffer, dropping incomplete rows.
    ///
    /// The timestamp array defines the row count; a shorter companion
    /// array simply makes its trailing rows incomplete.
    pub fn build_buffer(&self) -> SignalBuffer {
        let rf = self.kind() == SessionKind::Q0;
        let mut builder = if rf {
            SignalBufferBuilder::with_rf_signals()
        } else {
            SignalBufferBuilder::new()
        };

        let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();
        for i in 0..self.timestamps.len() {
            builder.push_row(SignalRow {
                timestamp: at(&self.timestamps, i),
                liquid_level: at(&self.liquid_level, i),
                heater_setpoint: at(&self.heater_setpoint, i),
                heater_readback: at(&self.heater_readback, i),
                valve_position: at(&self.valve_position, i),
                amplitude: self.amplitude.as_deref().and_then(|s| at(s, i)),
                pressure: self.pressure.as_deref().and_then(|s| at(s, i)),
            });
        }
        builder.build()
    }
}

/// Session file errors.
#[derive(Debug)]
pub enum SessionFileError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for SessionFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFileError::IoError(e) => write!(f, "IO error: {e}"),
            SessionFileError::ParseError(e) => write!(f, "Parse error: {e}"),
            SessionFileError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for SessionFileError {}
