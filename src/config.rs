//! Configuration for the Q0 analyzer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Stability thresholds for run segmentation
    pub thresholds: StabilityThresholds,

    /// Settle-time parameters applied after heat-load changes
    pub settle: SettleParams,

    /// Physical constants of the Q0 model
    pub physics: PhysicsParams,

    /// Path for analysis records
    pub report_path: PathBuf,

    /// Path for storing state and counter snapshots
    pub data_path: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("srf-q0-analyzer");

        Self {
            thresholds: StabilityThresholds::default(),
            settle: SettleParams::default(),
            physics: PhysicsParams::default(),
            report_path: data_dir.join("records"),
            data_path: data_dir,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: AnalysisConfig = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("srf-q0-analyzer")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.report_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Thresholds that decide when operating conditions count as stable.
///
/// Values differ between machines and measurement campaigns, so all of
/// them live in configuration rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityThresholds {
    /// Minimum downstream liquid level in percent
    pub min_liquid_level: f64,

    /// Allowed JT valve deviation from the reference position, in percent
    pub valve_position_tolerance: f64,

    /// Allowed disagreement between heater setpoint and readback, in watts
    pub heater_tolerance_watts: f64,

    /// Allowed sample-to-sample cavity amplitude change, in MV/m
    pub gradient_tolerance: f64,

    /// Minimum duration for a run to be kept, in seconds
    pub min_run_duration_secs: f64,

    /// Median filter window for liquid-level smoothing, in samples
    pub level_median_window: usize,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        Self {
            min_liquid_level: 90.0,
            valve_position_tolerance: 2.0,
            heater_tolerance_watts: 1.2,
            gradient_tolerance: 0.7,
            min_run_duration_secs: 600.0,
            level_median_window: 25,
        }
    }
}

/// Settle-time model applied after each heat-load step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleParams {
    /// Seconds of settling per watt of heat-load step
    pub seconds_per_watt: f64,

    /// Wait already performed during data collection, in seconds
    pub already_waited_secs: f64,
}

impl Default for SettleParams {
    fn default() -> Self {
        Self {
            seconds_per_watt: 25.0,
            already_waited_secs: 30.0,
        }
    }
}

/// Empirical constants of the Q0 model.
///
/// R/Q depends on cavity geometry (1012 for the current cavities, 939.3
/// for the older geometry); the C constants parameterize the
/// surface-resistance temperature correction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhysicsParams {
    /// Cavity geometry factor R/Q in ohms
    pub r_over_q: f64,

    /// Correction numerator constant
    pub c1: f64,

    /// Constant term of the field-dependent factor
    pub c2: f64,

    /// Linear term of the field-dependent factor
    pub c3: f64,

    /// Quadratic term of the field-dependent factor
    pub c5: f64,

    /// Exponential temperature coefficient
    pub c6: f64,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            r_over_q: 1012.0,
            c1: 271.0,
            c2: 0.0000726,
            c3: 0.00000214,
            c5: 0.000000043,
            c6: -17.02,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
