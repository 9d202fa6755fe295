//! SRF Q0 Analyzer - Calorimetric Q0 measurement for superconducting cavities.
//!
//! This library analyzes archived cryomodule signals to measure Q0, the
//! intrinsic quality factor of a superconducting RF cavity. The method is
//! calorimetric: heat dissipated into the liquid helium bath shows up as a
//! faster drop in liquid level, and electric heater runs with known loads
//! calibrate that response so the drop measured under RF converts into the
//! cavity's dissipated power.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SRF Q0 Analyzer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Buffer    │──▶│   Segment   │──▶│   Settle    │       │
//! │  │   (align)   │   │   (runs)    │   │   (trim)    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │               │
//! │                     ┌───────────────────────┤               │
//! │                     ▼                       ▼               │
//! │              ┌─────────────┐         ┌─────────────┐       │
//! │              │ Calibration │────────▶│     Q0      │       │
//! │              │ (dLL/dt per │         │  estimate   │       │
//! │              │    watt)    │         │             │       │
//! │              └─────────────┘         └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use srf_q0_analyzer::config::AnalysisConfig;
//! use srf_q0_analyzer::session::{CalibrationSession, SessionFile};
//!
//! let config = AnalysisConfig::load().unwrap_or_default();
//! let file = SessionFile::load(std::path::Path::new("calibration.json"))
//!     .expect("Failed to read session file");
//!
//! let buffer = file.build_buffer();
//! let outcome = CalibrationSession::new(file.meta, file.reference, buffer, config)
//!     .process()
//!     .expect("Calibration failed");
//! println!("dLL/dt per watt: {:.6} %/s/W", outcome.model.slope);
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod report;
pub mod session;

// Re-export key types at crate root for convenience
pub use config::AnalysisConfig;
pub use core::{AnalysisError, CalibrationModel, Q0Estimate, SignalBuffer};
pub use diagnostics::{AnalysisLog, AnalysisStats, SharedAnalysisLog};
pub use report::{CalibrationRecord, Q0Record};
pub use session::{CalibrationSession, Q0Session, SessionFile, SessionKey, SessionMeta};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Measurement method summary that can be displayed to users.
pub const METHOD_SUMMARY: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║            SRF Q0 ANALYZER - CALORIMETRIC MEASUREMENT            ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Q0 is measured by turning cryogenic bookkeeping into watts.     ║
║                                                                  ║
║  CALIBRATION (heater-only session):                              ║
║    • Electric heaters step through known loads                   ║
║    • Each stable stretch yields a liquid-level slope (dLL/dt)    ║
║    • A line through (load, slope) calibrates %/s per watt        ║
║                                                                  ║
║  MEASUREMENT (RF session):                                       ║
║    • The cavity runs at a fixed gradient                         ║
║    • The level slope under RF projects onto the calibration      ║
║    • Projected watts plus pressure-corrected cavity physics      ║
║      give Q0                                                     ║
║                                                                  ║
║  All analysis runs locally on exported archive data. View        ║
║  cumulative statistics anytime with:                             ║
║    srf-q0 status                                                 ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
