//! Session identity and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::segment::ReferenceParams;

/// Metadata describing one archived measurement window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Cryomodule identifier, e.g. "CM16".
    pub cryomodule: String,

    /// Cavity number within the cryomodule, when the session targets a
    /// single cavity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cavity: Option<u8>,

    /// Start of the archived window.
    pub start: DateTime<Utc>,

    /// End of the archived window.
    pub end: DateTime<Utc>,

    /// Sampling interval in seconds.
    pub sample_interval_secs: u32,
}

impl SessionMeta {
    /// Short human-readable label, e.g. "CM16 cavity 3".
    pub fn label(&self) -> String {
        match self.cavity {
            Some(cavity) => format!("{} cavity {}", self.cryomodule, cavity),
            None => self.cryomodule.clone(),
        }
    }
}

/// Structural identity of a calibration request.
///
/// Two requests with the same cryomodule, cavity, time window, sampling
/// interval, and reference parameters describe the same physical
/// measurement, so one computed outcome serves both. Reference values are
/// compared by bit pattern to keep the key hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Cryomodule identifier.
    pub cryomodule: String,
    /// Cavity number, when present.
    pub cavity: Option<u8>,
    /// Start of the archived window.
    pub start: DateTime<Utc>,
    /// End of the archived window.
    pub end: DateTime<Utc>,
    /// Sampling interval in seconds.
    pub sample_interval_secs: u32,
    reference_bits: [u64; 3],
}

impl SessionKey {
    /// Derive the key for a session's metadata and reference parameters.
    pub fn new(meta: &SessionMeta, reference: ReferenceParams) -> Self {
        Self {
            cryomodule: meta.cryomodule.clone(),
            cavity: meta.cavity,
            start: meta.start,
            end: meta.end,
            sample_interval_secs: meta.sample_interval_secs,
            reference_bits: [
                reference.valve_position.to_bits(),
                reference.heat_load_des.to_bits(),
                reference.heat_load_act.to_bits(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn meta() -> SessionMeta {
        SessionMeta {
            cryomodule: "CM16".to_string(),
            cavity: Some(3),
            start: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            end: DateTime::from_timestamp(1_700_003_600, 0).unwrap_or_default(),
            sample_interval_secs: 1,
        }
    }

    fn reference() -> ReferenceParams {
        ReferenceParams {
            valve_position: 40.0,
            heat_load_des: 24.0,
            heat_load_act: 24.2,
        }
    }

    #[test]
    fn test_meta_label() {
        assert_eq!(meta().label(), "CM16 cavity 3");
        let mut cryomodule_only = meta();
        cryomodule_only.cavity = None;
        assert_eq!(cryomodule_only.label(), "CM16");
    }

    #[test]
    fn test_identical_requests_share_a_key() {
        let a = SessionKey::new(&meta(), reference());
        let b = SessionKey::new(&meta(), reference());
        assert_eq!(a, b);
    }

    #[test]
    fn test_reference_change_changes_key() {
        let a = SessionKey::new(&meta(), reference());
        let mut shifted = reference();
        shifted.heat_load_act = 24.3;
        let b = SessionKey::new(&meta(), shifted);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_usable_in_map() {
        let mut map = HashMap::new();
        map.insert(SessionKey::new(&meta(), reference()), 1u32);
        assert_eq!(map.get(&SessionKey::new(&meta(), reference())), Some(&1));
    }
}
