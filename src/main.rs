//! SRF Q0 Analyzer CLI
//!
//! Calorimetric Q0 measurement for superconducting cavities.

use clap::{Parser, Subcommand};
use srf_q0_analyzer::{
    config::AnalysisConfig,
    core::{Run, RunKind, RunSegmenter, SessionKind, SettleFilter},
    diagnostics::create_shared_log_with_persistence,
    report::{CalibrationRecord, Q0Record, RunRecord},
    session::{create_shared_cache, CalibrationSession, Q0Session, SessionFile, SessionKey},
    METHOD_SUMMARY, VERSION,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "srf-q0")]
#[command(author = "SRF Commissioning")]
#[command(version = VERSION)]
#[command(about = "Calorimetric Q0 measurement for superconducting cavities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a heater calibration from a session file
    Calibrate {
        /// Calibration session file
        input: PathBuf,

        /// Output directory for the calibration record
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Estimate Q0 for one or more RF session files
    Q0 {
        /// RF session files to analyze
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Previously saved calibration record to apply
        #[arg(long)]
        calibration_record: Option<PathBuf>,

        /// Heater calibration session file to fit and apply
        #[arg(long)]
        calibration_data: Option<PathBuf>,

        /// Reference gradient override in MV/m
        #[arg(long)]
        gradient: Option<f64>,

        /// Output directory for Q0 records
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Preview run segmentation for a session file without fitting
    Runs {
        /// Session file
        input: PathBuf,
    },

    /// Show cumulative analysis statistics
    Status,

    /// Explain the measurement method
    Method,

    /// Show configuration
    Config,
}

fn main() {
    // Log to the terminal, filtered by RUST_LOG (warnings and up by default)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Calibrate { input, output } => {
            cmd_calibrate(input, output);
        }
        Commands::Q0 {
            inputs,
            calibration_record,
            calibration_data,
            gradient,
            output,
        } => {
            cmd_q0(inputs, calibration_record, calibration_data, gradient, output);
        }
        Commands::Runs { input } => {
            cmd_runs(input);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Method => {
            cmd_method();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn cmd_calibrate(input: PathBuf, output: Option<PathBuf>) {
    let config = AnalysisConfig::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let log = create_shared_log_with_persistence(config.data_path.join("stats.json"));

    let file = match SessionFile::load(&input) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error reading session file {input:?}: {e}");
            std::process::exit(1);
        }
    };
    if file.kind() == SessionKind::Q0 {
        eprintln!("Error: {input:?} carries RF signals; use 'srf-q0 q0' for RF sessions");
        std::process::exit(1);
    }

    println!("SRF Q0 Analyzer v{VERSION}");
    println!();
    println!("Calibrating {}...", file.meta.label());

    let buffer = file.build_buffer();
    println!(
        "  Samples: {} ({} dropped)",
        buffer.len(),
        buffer.dropped_samples
    );

    let session = CalibrationSession::new(
        file.meta.clone(),
        file.reference,
        buffer,
        config.clone(),
    );
    let outcome = match session.process() {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: calibration failed: {e}");
            std::process::exit(1);
        }
    };

    log.record_session_counters(&outcome.counters);
    log.record_runs_fitted(outcome.runs.len() as u32);
    log.record_session_completed();

    println!();
    print_runs(&outcome.runs, outcome.meta.sample_interval_secs);
    println!();
    println!("Calibration fit:");
    println!("  Slope: {:.6} %/s/W", outcome.model.slope);
    println!("  Intercept: {:.6} %/s", outcome.model.intercept);
    println!("  R^2: {:.4}", outcome.model.r_squared);
    println!("  Heat adjustment: {:+.3} W", outcome.model.heat_adjustment);

    let record = CalibrationRecord::from_outcome(&outcome);
    let dir = output.unwrap_or_else(|| config.report_path.clone());
    match record.save(&dir) {
        Ok(path) => {
            println!();
            println!("Saved calibration record to {path:?}");
        }
        Err(e) => {
            eprintln!("Error writing calibration record: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }
}

/// Where the Q0 command gets its calibration from.
enum CalibrationSource {
    Record(Box<CalibrationRecord>),
    Data(SessionFile),
}

fn cmd_q0(
    inputs: Vec<PathBuf>,
    calibration_record: Option<PathBuf>,
    calibration_data: Option<PathBuf>,
    gradient: Option<f64>,
    output: Option<PathBuf>,
) {
    let config = AnalysisConfig::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let log = create_shared_log_with_persistence(config.data_path.join("stats.json"));

    let source = match (calibration_record, calibration_data) {
        (Some(path), None) => match CalibrationRecord::load(&path) {
            Ok(record) => CalibrationSource::Record(Box::new(record)),
            Err(e) => {
                eprintln!("Error reading calibration record {path:?}: {e}");
                std::process::exit(1);
            }
        },
        (None, Some(path)) => match SessionFile::load(&path) {
            Ok(file) => {
                if file.kind() == SessionKind::Q0 {
                    eprintln!("Error: calibration data {path:?} carries RF signals");
                    std::process::exit(1);
                }
                CalibrationSource::Data(file)
            }
            Err(e) => {
                eprintln!("Error reading calibration data {path:?}: {e}");
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Error: exactly one of --calibration-record or --calibration-data is required");
            std::process::exit(1);
        }
    };
    let calibration_id = match &source {
        CalibrationSource::Record(record) => Some(record.record_id),
        CalibrationSource::Data(_) => None,
    };

    println!("SRF Q0 Analyzer v{VERSION}");
    println!();

    // One calibration serves every input; the cache computes it once
    let cache = create_shared_cache();
    let record_dir = output.unwrap_or_else(|| config.report_path.clone());

    for input in &inputs {
        let file = match SessionFile::load(input) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Error reading session file {input:?}: {e}");
                std::process::exit(1);
            }
        };
        if file.kind() != SessionKind::Q0 {
            eprintln!("Error: {input:?} has no RF signals; use 'srf-q0 calibrate'");
            std::process::exit(1);
        }
        let reference_gradient = match gradient.or(file.reference_gradient) {
            Some(g) => g,
            None => {
                eprintln!("Error: {input:?} has no reference gradient; pass --gradient");
                std::process::exit(1);
            }
        };

        let model = match &source {
            CalibrationSource::Record(record) => record.model(),
            CalibrationSource::Data(calibration_file) => {
                let key = SessionKey::new(&calibration_file.meta, calibration_file.reference);
                if cache.get(&key).is_some() {
                    log.record_cache_hit();
                }
                let outcome = cache.get_or_compute(key, || {
                    CalibrationSession::new(
                        calibration_file.meta.clone(),
                        calibration_file.reference,
                        calibration_file.build_buffer(),
                        config.clone(),
                    )
                    .process()
                });
                match outcome {
                    Ok(outcome) => outcome.model.clone(),
                    Err(e) => {
                        eprintln!("Error: calibration failed: {e}");
                        std::process::exit(1);
                    }
                }
            }
        };

        println!("Analyzing {}...", file.meta.label());
        let buffer = file.build_buffer();
        println!(
            "  Samples: {} ({} dropped)",
            buffer.len(),
            buffer.dropped_samples
        );

        let session = Q0Session::new(
            file.meta.clone(),
            file.reference,
            reference_gradient,
            buffer,
            model,
            config.clone(),
        );
        let outcome = match session.process() {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Error: Q0 analysis failed for {input:?}: {e}");
                std::process::exit(1);
            }
        };

        log.record_session_counters(&outcome.counters);
        log.record_runs_fitted(outcome.runs.len() as u32);
        let fallbacks: u32 = outcome
            .estimates
            .iter()
            .map(|(_, e)| e.invalid_gradient_samples)
            .sum();
        log.record_gradient_fallbacks(fallbacks);
        log.record_session_completed();

        println!();
        print_runs(&outcome.runs, outcome.meta.sample_interval_secs);
        println!();
        for (idx, estimate) in &outcome.estimates {
            println!("Run [{idx}]: Q0 {:.3e}", estimate.q0);
            println!(
                "  RF heat: {:.2} W (projected {:.2} W, adjustment {:+.2} W, electrical {:.2} W)",
                estimate.rf_heat_load,
                estimate.projected_heat,
                estimate.avg_heat_adjustment,
                estimate.electrical_heat
            );
            println!(
                "  Samples: {} used, {} excluded, {} gradient fallbacks",
                estimate.samples_used, estimate.excluded_samples, estimate.invalid_gradient_samples
            );
            println!(
                "  Avg pressure: {:.2} Torr, RMS gradient: {:.2} MV/m",
                estimate.avg_pressure_torr, estimate.rms_gradient
            );
        }
        println!();
        println!(
            "Session Q0: {:.3e} at {:.1} MV/m",
            outcome.session_q0, reference_gradient
        );

        let record = Q0Record::from_outcome(&outcome, calibration_id);
        match record.save(&record_dir) {
            Ok(path) => println!("Saved Q0 record to {path:?}"),
            Err(e) => {
                eprintln!("Error writing Q0 record: {e}");
                std::process::exit(1);
            }
        }
        println!();
    }

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }
}

fn cmd_runs(input: PathBuf) {
    let config = AnalysisConfig::load().unwrap_or_default();

    let file = match SessionFile::load(&input) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error reading session file {input:?}: {e}");
            std::process::exit(1);
        }
    };
    let kind = file.kind();
    let mut buffer = file.build_buffer();
    buffer.smooth_liquid_level(config.thresholds.level_median_window);

    let mut segmentation =
        RunSegmenter::new(&buffer, file.reference, config.thresholds.clone(), kind).segment();
    let settled_away = SettleFilter::new(config.settle).apply(
        &buffer,
        file.reference,
        kind,
        &mut segmentation.runs,
    );

    println!(
        "Run preview for {} ({} session)",
        file.meta.label(),
        match kind {
            SessionKind::Calibration => "calibration",
            SessionKind::Q0 => "RF",
        }
    );
    println!();
    println!(
        "  Samples: {} ({} dropped)",
        buffer.len(),
        buffer.dropped_samples
    );
    println!(
        "  Short candidates discarded: {}",
        segmentation.discarded_short
    );
    println!("  Runs consumed by settling: {}", settled_away);
    println!();

    if segmentation.runs.is_empty() {
        println!("No usable runs.");
        return;
    }
    for (i, run) in segmentation.runs.iter().enumerate() {
        println!(
            "  [{}] {} {}..{} ({} samples, settle cutoff {:.0}s, heat delta {:+.2} W)",
            i,
            kind_label(run.kind),
            run.start_idx,
            run.end_idx,
            run.sample_count(),
            run.settle_cutoff_secs,
            run.heater_delta_des
        );
    }
}

fn cmd_status() {
    let config = AnalysisConfig::load().unwrap_or_default();

    println!("SRF Q0 Analyzer Status");
    println!("======================");
    println!();

    println!("Configuration:");
    println!(
        "  Minimum liquid level: {:.1} %",
        config.thresholds.min_liquid_level
    );
    println!(
        "  Minimum run duration: {:.0}s",
        config.thresholds.min_run_duration_secs
    );
    println!(
        "  Settle time: {:.0}s per watt",
        config.settle.seconds_per_watt
    );
    println!("  R/Q: {:.1} ohms", config.physics.r_over_q);
    println!("  Record directory: {:?}", config.report_path);
    println!();

    // Load and show cumulative stats if available
    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                if let Some(sessions) = stats.get("sessions_completed") {
                    println!("  Sessions completed: {sessions}");
                }
                if let Some(runs) = stats.get("runs_fitted") {
                    println!("  Runs fitted: {runs}");
                }
                if let Some(dropped) = stats.get("samples_dropped") {
                    println!("  Samples dropped: {dropped}");
                }
                if let Some(fallbacks) = stats.get("gradient_fallbacks") {
                    println!("  Gradient fallbacks: {fallbacks}");
                }
                if let Some(hits) = stats.get("cache_hits") {
                    println!("  Cache hits: {hits}");
                }
            }
        }
    } else {
        println!("No previous analysis data found.");
    }
}

fn cmd_method() {
    println!("{METHOD_SUMMARY}");
}

fn cmd_config() {
    let config = AnalysisConfig::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", AnalysisConfig::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Print a fitted run table.
fn print_runs(runs: &[Run], sample_interval_secs: u32) {
    println!("Runs:");
    for (i, run) in runs.iter().enumerate() {
        let record = RunRecord::from_run(run, sample_interval_secs);
        println!(
            "  [{}] {} {}..{} ({:.0}s), heat delta {:+.2} W, slope {:.6} %/s, R^2 {:.4}",
            i,
            kind_label(record.kind),
            record.start_idx,
            record.end_idx,
            record.duration_secs,
            record.heater_delta_act.unwrap_or(record.heater_delta_des),
            record.slope,
            record.r_squared
        );
    }
}

fn kind_label(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Heater => "heater",
        RunKind::Rf => "RF",
    }
}
