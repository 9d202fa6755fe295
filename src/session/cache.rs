//! Calibration result cache.
//!
//! A calibration sweep is expensive to collect and deterministic to
//! analyze, so identical requests must not be fitted twice. The cache
//! maps a structural `SessionKey` to its computed outcome; the compute
//! closure runs under the lock, guaranteeing at most one computation per
//! key even with concurrent callers. Failed computations are not cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::core::AnalysisError;
use crate::session::runner::CalibrationOutcome;
use crate::session::types::SessionKey;

/// Cache of computed calibration outcomes keyed by session identity.
#[derive(Default)]
pub struct CalibrationCache {
    entries: Mutex<HashMap<SessionKey, Arc<CalibrationOutcome>>>,
}

impl CalibrationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a previously computed outcome.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<CalibrationOutcome>> {
        self.guard().get(key).map(Arc::clone)
    }

    /// Return the cached outcome for `key`, computing and caching it if
    /// absent.
    pub fn get_or_compute<F>(
        &self,
        key: SessionKey,
        compute: F,
    ) -> Result<Arc<CalibrationOutcome>, AnalysisError>
    where
        F: FnOnce() -> Result<CalibrationOutcome, AnalysisError>,
    {
        let mut entries = self.guard();
        if let Some(existing) = entries.get(&key) {
            debug!("calibration cache hit for {}", key.cryomodule);
            return Ok(Arc::clone(existing));
        }
        let outcome = Arc::new(compute()?);
        entries.insert(key, Arc::clone(&outcome));
        Ok(outcome)
    }

    /// Number of cached outcomes.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// True when nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<CalibrationOutcome>>> {
        // A panicked computation leaves the map intact, so the poison flag
        // carries no information here.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Thread-safe shared handle to a calibration cache.
pub type SharedCalibrationCache = Arc<CalibrationCache>;

/// Create a new shared calibration cache.
pub fn create_shared_cache() -> SharedCalibrationCache {
    Arc::new(CalibrationCache::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::CalibrationModel;
    use crate::core::segment::ReferenceParams;
    use crate::session::runner::SessionCounters;
    use crate::session::types::SessionMeta;
    use chrono::DateTime;

    fn key(cryomodule: &str) -> SessionKey {
        let meta = SessionMeta {
            cryomodule: cryomodule.to_string(),
            cavity: None,
            start: DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp"),
            end: DateTime::from_timestamp(1_700_003_600, 0).expect("timestamp"),
            sample_interval_secs: 1,
        };
        let reference = ReferenceParams {
            valve_position: 40.0,
            heat_load_des: 24.0,
            heat_load_act: 24.0,
        };
        SessionKey::new(&meta, reference)
    }

    fn outcome(cryomodule: &str) -> CalibrationOutcome {
        CalibrationOutcome {
            meta: SessionMeta {
                cryomodule: cryomodule.to_string(),
                cavity: None,
                start: DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp"),
                end: DateTime::from_timestamp(1_700_003_600, 0).expect("timestamp"),
                sample_interval_secs: 1,
            },
            reference: ReferenceParams {
                valve_position: 40.0,
                heat_load_des: 24.0,
                heat_load_act: 24.0,
            },
            model: CalibrationModel {
                slope: -0.0025,
                intercept: 0.0,
                r_squared: 1.0,
                heat_adjustment: 0.0,
                points: Vec::new(),
            },
            runs: Vec::new(),
            counters: SessionCounters::default(),
        }
    }

    #[test]
    fn test_identical_requests_computed_once() {
        let cache = CalibrationCache::new();
        let mut computations = 0;

        let first = cache
            .get_or_compute(key("CM16"), || {
                computations += 1;
                Ok(outcome("CM16"))
            })
            .expect("first compute");
        let second = cache
            .get_or_compute(key("CM16"), || {
                computations += 1;
                Ok(outcome("CM16"))
            })
            .expect("cached");

        assert_eq!(computations, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_keys_computed_separately() {
        let cache = CalibrationCache::new();
        cache
            .get_or_compute(key("CM16"), || Ok(outcome("CM16")))
            .expect("compute CM16");
        cache
            .get_or_compute(key("CM21"), || Ok(outcome("CM21")))
            .expect("compute CM21");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_computation_not_cached() {
        let cache = CalibrationCache::new();
        let err = cache.get_or_compute(key("CM16"), || {
            Err(AnalysisError::InsufficientCalibrationData { heater_runs: 1 })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert!(cache.get(&key("CM16")).is_none());
    }
}
