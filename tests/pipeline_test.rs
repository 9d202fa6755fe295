//! Integration tests for the full analysis pipeline

use chrono::DateTime;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use srf_q0_analyzer::config::AnalysisConfig;
use srf_q0_analyzer::core::ReferenceParams;
use srf_q0_analyzer::report::{CalibrationRecord, Q0Record};
use srf_q0_analyzer::session::{
    create_shared_cache, CalibrationSession, Q0Session, SessionFile, SessionKey, SessionMeta,
    SharedCalibrationCache,
};

fn test_record_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    // The synthetic sessions drain the level well below the production
    // minimum and keep their last plateau shorter than 10 minutes
    config.thresholds.min_liquid_level = 70.0;
    config.thresholds.min_run_duration_secs = 200.0;
    config
}

fn meta(cavity: Option<u8>, samples: i64) -> SessionMeta {
    SessionMeta {
        cryomodule: "CM16".to_string(),
        cavity,
        start: DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp"),
        end: DateTime::from_timestamp(1_700_000_000 + samples, 0).expect("timestamp"),
        sample_interval_secs: 1,
    }
}

fn reference() -> ReferenceParams {
    ReferenceParams {
        valve_position: 40.0,
        heat_load_des: 24.0,
        heat_load_act: 24.0,
    }
}

/// Three heater plateaus: +8 W, +16 W, and back to the reference load.
/// Level slopes are exactly -0.01, -0.02, and 0.0 %/s.
fn calibration_session_file() -> SessionFile {
    let n = 1800;
    let mut heater = Vec::with_capacity(n);
    let mut level = Vec::with_capacity(n);
    for i in 0..n {
        let (watts, ll) = if i < 600 {
            (32.0, 93.0 - 0.01 * i as f64)
        } else if i < 1200 {
            (40.0, 87.0 - 0.02 * (i - 600) as f64)
        } else {
            (24.0, 75.0)
        };
        heater.push(Some(watts));
        level.push(Some(ll));
    }
    SessionFile {
        meta: meta(None, n as i64),
        reference: reference(),
        reference_gradient: None,
        timestamps: (0..n).map(|i| Some(i as f64)).collect(),
        liquid_level: level,
        heater_setpoint: heater.clone(),
        heater_readback: heater,
        valve_position: vec![Some(40.0); n],
        amplitude: None,
        pressure: None,
    }
}

/// One +8 W heater run, one RF run at 16 MV/m, and a trailing stretch too
/// short to keep. Level slopes are exactly -0.01, -0.02, and 0.0 %/s.
fn rf_session_file() -> SessionFile {
    let n = 1400;
    let mut heater = Vec::with_capacity(n);
    let mut level = Vec::with_capacity(n);
    for i in 0..n {
        let (watts, ll) = if i < 600 {
            (32.0, 95.0 - 0.01 * i as f64)
        } else if i < 1200 {
            (24.0, 89.0 - 0.02 * (i - 600) as f64)
        } else {
            (32.0, 77.02)
        };
        heater.push(Some(watts));
        level.push(Some(ll));
    }
    SessionFile {
        meta: meta(Some(1), n as i64),
        reference: reference(),
        reference_gradient: Some(16.0),
        timestamps: (0..n).map(|i| Some(i as f64)).collect(),
        liquid_level: level,
        heater_setpoint: heater.clone(),
        heater_readback: heater,
        valve_position: vec![Some(40.0); n],
        amplitude: Some(vec![Some(16.0); n]),
        pressure: Some(vec![Some(23.6); n]),
    }
}

#[test]
fn test_calibration_recovers_known_slope() {
    let file = calibration_session_file();
    let session = CalibrationSession::new(
        file.meta.clone(),
        file.reference,
        file.build_buffer(),
        test_config(),
    );
    let outcome = session.process().expect("calibration succeeds");

    // Heater steps at samples 600 and 1200 split the session into three
    // runs, each trimmed by its settle time
    assert_eq!(outcome.runs.len(), 3);
    assert_eq!(outcome.runs[0].start_idx, 170);
    assert_eq!(outcome.runs[1].start_idx, 770);
    assert_eq!(outcome.runs[2].start_idx, 1570);

    // Slopes (-0.01, -0.02, 0.0) against deltas (8, 16, 0) lie on an
    // exact line through the origin
    assert!((outcome.model.slope - (-0.00125)).abs() < 1e-9);
    assert!(outcome.model.intercept.abs() < 1e-9);
    assert!((outcome.model.r_squared - 1.0).abs() < 1e-9);
    assert!(outcome.model.heat_adjustment.abs() < 1e-6);

    assert_eq!(outcome.counters.samples_dropped, 0);
    assert_eq!(outcome.counters.short_runs_discarded, 0);
    assert_eq!(outcome.counters.settle_runs_discarded, 0);
    assert_eq!(outcome.counters.fits_failed, 0);
}

#[test]
fn test_q0_pipeline_end_to_end() {
    let calibration_file = calibration_session_file();
    let calibration = CalibrationSession::new(
        calibration_file.meta.clone(),
        calibration_file.reference,
        calibration_file.build_buffer(),
        test_config(),
    )
    .process()
    .expect("calibration succeeds");

    let file = rf_session_file();
    let gradient = file.reference_gradient.expect("reference gradient");
    let session = Q0Session::new(
        file.meta.clone(),
        file.reference,
        gradient,
        file.build_buffer(),
        calibration.model.clone(),
        test_config(),
    );
    let outcome = session.process().expect("Q0 session succeeds");

    // The trailing 199 s stretch is below the minimum run duration
    assert_eq!(outcome.runs.len(), 2);
    assert_eq!(outcome.counters.short_runs_discarded, 1);
    assert!(outcome.runs[0].is_heater());
    assert!(outcome.runs[1].is_rf());

    assert_eq!(outcome.estimates.len(), 1);
    let (run_index, estimate) = &outcome.estimates[0];
    assert_eq!(*run_index, 1);

    // -0.02 %/s through the -0.00125 %/s/W calibration is 16 W of RF heat
    assert!((estimate.projected_heat - 16.0).abs() < 1e-6);
    assert!(estimate.avg_heat_adjustment.abs() < 1e-6);
    assert!(estimate.electrical_heat.abs() < 1e-9);
    assert!((estimate.rf_heat_load - 16.0).abs() < 1e-6);
    assert_eq!(estimate.samples_used, 429);
    assert_eq!(estimate.invalid_gradient_samples, 0);
    assert_eq!(estimate.excluded_samples, 0);
    assert!((estimate.avg_pressure_torr - 23.6).abs() < 1e-9);
    assert!((estimate.rms_gradient - 16.0).abs() < 1e-9);

    // 23.6 Torr pins the bath at the 2 K reference, so Q0 reduces to the
    // uncorrected value
    let expected = (16.0e6_f64).powi(2) / (1012.0 * 16.0);
    assert!((outcome.session_q0 - expected).abs() / expected < 1e-6);
}

#[test]
fn test_records_round_trip_and_link() {
    let calibration_file = calibration_session_file();
    let calibration = CalibrationSession::new(
        calibration_file.meta.clone(),
        calibration_file.reference,
        calibration_file.build_buffer(),
        test_config(),
    )
    .process()
    .expect("calibration succeeds");

    let dir = test_record_dir("srf-q0-pipeline-records");
    std::fs::remove_dir_all(&dir).ok();

    let calibration_record = CalibrationRecord::from_outcome(&calibration);
    let calibration_path = calibration_record.save(&dir).expect("save calibration record");
    let loaded = CalibrationRecord::load(&calibration_path).expect("load calibration record");
    assert_eq!(loaded.record_id, calibration_record.record_id);
    assert_eq!(loaded.model(), calibration.model);
    assert_eq!(loaded.runs.len(), 3);

    // Analyze an RF session against the loaded record, as the CLI does
    let file = rf_session_file();
    let gradient = file.reference_gradient.expect("reference gradient");
    let outcome = Q0Session::new(
        file.meta.clone(),
        file.reference,
        gradient,
        file.build_buffer(),
        loaded.model(),
        test_config(),
    )
    .process()
    .expect("Q0 session succeeds");

    let q0_record = Q0Record::from_outcome(&outcome, Some(loaded.record_id));
    let q0_path = q0_record.save(&dir).expect("save Q0 record");
    let q0_loaded = Q0Record::load(&q0_path).expect("load Q0 record");

    assert_eq!(q0_loaded.calibration_id, Some(calibration_record.record_id));
    assert_eq!(q0_loaded.session_q0, outcome.session_q0);
    assert_eq!(q0_loaded.results.len(), 1);
    assert_eq!(q0_loaded.reference_gradient, 16.0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_cache_computes_shared_calibration_once() {
    let file = calibration_session_file();
    let cache = create_shared_cache();
    let computes = Arc::new(AtomicU32::new(0));

    let run = |cache: &SharedCalibrationCache| {
        let key = SessionKey::new(&file.meta, file.reference);
        let computes = Arc::clone(&computes);
        let file = &file;
        cache
            .get_or_compute(key, move || {
                computes.fetch_add(1, Ordering::SeqCst);
                CalibrationSession::new(
                    file.meta.clone(),
                    file.reference,
                    file.build_buffer(),
                    test_config(),
                )
                .process()
            })
            .expect("calibration succeeds")
    };

    // Two cavities of the same cryomodule ask for the same calibration
    let first = run(&cache);
    let second = run(&cache);

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
}
