//! Cumulative analysis counters.
//!
//! Recoverable data-quality events (dropped samples, discarded runs,
//! gradient fallbacks) never abort a session, so they are tallied here
//! instead and surfaced through the status report. Counters can persist
//! across invocations via a JSON snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::session::runner::SessionCounters;

/// Thread-safe tally of everything the pipeline dropped or replaced.
pub struct AnalysisLog {
    /// Buffer rows dropped during ingestion.
    samples_dropped: AtomicU64,
    /// Run candidates below the minimum duration.
    short_runs_discarded: AtomicU64,
    /// Runs consumed entirely by settle trimming.
    settle_runs_discarded: AtomicU64,
    /// Runs that fitted successfully.
    runs_fitted: AtomicU64,
    /// Runs whose liquid-level fit failed.
    fits_failed: AtomicU64,
    /// RF runs whose Q0 estimate failed.
    estimates_failed: AtomicU64,
    /// Amplitude samples replaced by the reference gradient.
    gradient_fallbacks: AtomicU64,
    /// Sessions that completed whole.
    sessions_completed: AtomicU64,
    /// Calibration requests served from the cache.
    cache_hits: AtomicU64,
    /// When tracking began.
    started_at: DateTime<Utc>,
    /// Optional path for persisting counters.
    persist_path: Option<PathBuf>,
}

/// Snapshot of the counters at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub samples_dropped: u64,
    pub short_runs_discarded: u64,
    pub settle_runs_discarded: u64,
    pub runs_fitted: u64,
    pub fits_failed: u64,
    pub estimates_failed: u64,
    pub gradient_fallbacks: u64,
    pub sessions_completed: u64,
    pub cache_hits: u64,
    pub started_at: DateTime<Utc>,
}

/// On-disk form of the counters.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_dropped: u64,
    short_runs_discarded: u64,
    settle_runs_discarded: u64,
    runs_fitted: u64,
    fits_failed: u64,
    estimates_failed: u64,
    gradient_fallbacks: u64,
    sessions_completed: u64,
    cache_hits: u64,
    started_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl AnalysisLog {
    /// Create a log with all counters at zero.
    pub fn new() -> Self {
        Self {
            samples_dropped: AtomicU64::new(0),
            short_runs_discarded: AtomicU64::new(0),
            settle_runs_discarded: AtomicU64::new(0),
            runs_fitted: AtomicU64::new(0),
            fits_failed: AtomicU64::new(0),
            estimates_failed: AtomicU64::new(0),
            gradient_fallbacks: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that persists to `path`, seeding counters from any
    /// snapshot already there.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path.clone());

        if path.exists() {
            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(persisted) = serde_json::from_str::<PersistedStats>(&content) {
                    log.samples_dropped = AtomicU64::new(persisted.samples_dropped);
                    log.short_runs_discarded = AtomicU64::new(persisted.short_runs_discarded);
                    log.settle_runs_discarded = AtomicU64::new(persisted.settle_runs_discarded);
                    log.runs_fitted = AtomicU64::new(persisted.runs_fitted);
                    log.fits_failed = AtomicU64::new(persisted.fits_failed);
                    log.estimates_failed = AtomicU64::new(persisted.estimates_failed);
                    log.gradient_fallbacks = AtomicU64::new(persisted.gradient_fallbacks);
                    log.sessions_completed = AtomicU64::new(persisted.sessions_completed);
                    log.cache_hits = AtomicU64::new(persisted.cache_hits);
                    log.started_at = persisted.started_at;
                }
            }
        }

        log
    }

    /// Fold one session's counters into the running totals.
    pub fn record_session_counters(&self, counters: &SessionCounters) {
        self.samples_dropped
            .fetch_add(counters.samples_dropped as u64, Ordering::Relaxed);
        self.short_runs_discarded
            .fetch_add(counters.short_runs_discarded as u64, Ordering::Relaxed);
        self.settle_runs_discarded
            .fetch_add(counters.settle_runs_discarded as u64, Ordering::Relaxed);
        self.fits_failed
            .fetch_add(counters.fits_failed as u64, Ordering::Relaxed);
        self.estimates_failed
            .fetch_add(counters.estimates_failed as u64, Ordering::Relaxed);
    }

    /// Record successfully fitted runs.
    pub fn record_runs_fitted(&self, count: u32) {
        self.runs_fitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record amplitude samples replaced by the reference gradient.
    pub fn record_gradient_fallbacks(&self, count: u32) {
        self.gradient_fallbacks
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a session that completed whole.
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a calibration request served from the cache.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn stats(&self) -> AnalysisStats {
        AnalysisStats {
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            short_runs_discarded: self.short_runs_discarded.load(Ordering::Relaxed),
            settle_runs_discarded: self.settle_runs_discarded.load(Ordering::Relaxed),
            runs_fitted: self.runs_fitted.load(Ordering::Relaxed),
            fits_failed: self.fits_failed.load(Ordering::Relaxed),
            estimates_failed: self.estimates_failed.load(Ordering::Relaxed),
            gradient_fallbacks: self.gradient_fallbacks.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Generate a human-readable summary.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Analysis Statistics\n\
             ===================\n\
             Sessions completed:    {}\n\
             Runs fitted:           {}\n\
             Samples dropped:       {}\n\
             Short runs discarded:  {}\n\
             Settle runs discarded: {}\n\
             Fits failed:           {}\n\
             Estimates failed:      {}\n\
             Gradient fallbacks:    {}\n\
             Cache hits:            {}\n\
             Tracking since:        {}",
            stats.sessions_completed,
            stats.runs_fitted,
            stats.samples_dropped,
            stats.short_runs_discarded,
            stats.settle_runs_discarded,
            stats.fits_failed,
            stats.estimates_failed,
            stats.gradient_fallbacks,
            stats.cache_hits,
            stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }

    /// Persist the counters, if a path was configured.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(path) = &self.persist_path {
            let stats = self.stats();
            let persisted = PersistedStats {
                samples_dropped: stats.samples_dropped,
                short_runs_discarded: stats.short_runs_discarded,
                settle_runs_discarded: stats.settle_runs_discarded,
                runs_fitted: stats.runs_fitted,
                fits_failed: stats.fits_failed,
                estimates_failed: stats.estimates_failed,
                gradient_fallbacks: stats.gradient_fallbacks,
                sessions_completed: stats.sessions_completed,
                cache_hits: stats.cache_hits,
                started_at: stats.started_at,
                last_updated: Utc::now(),
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(&persisted)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.short_runs_discarded.store(0, Ordering::Relaxed);
        self.settle_runs_discarded.store(0, Ordering::Relaxed);
        self.runs_fitted.store(0, Ordering::Relaxed);
        self.fits_failed.store(0, Ordering::Relaxed);
        self.estimates_failed.store(0, Ordering::Relaxed);
        self.gradient_fallbacks.store(0, Ordering::Relaxed);
        self.sessions_completed.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}

impl Default for AnalysisLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared reference to an analysis log.
pub type SharedAnalysisLog = Arc<AnalysisLog>;

/// Create a new shared analysis log.
pub fn create_shared_log() -> SharedAnalysisLog {
    Arc::new(AnalysisLog::new())
}

/// Create a new shared analysis log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedAnalysisLog {
    Arc::new(AnalysisLog::with_persistence(path))
}
