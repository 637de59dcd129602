//! Fingerprint status of a desired state against its last recorded import.
//!
//! Signal precedence:
//! 1. `NeverImported` (no record for the target)
//! 2. `Changed` (the desired state hashes differently from the record)
//! 3. `Current`
//!
//! Only the fingerprint is consulted; objects changed out of band on the
//! remote side are not detected.

use chrono::{DateTime, Utc};

use realmsync_core::DesiredState;

use crate::error::FingerprintError;
use crate::fingerprint::{self, Fingerprint, FingerprintStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintStatus {
    NeverImported,
    Current {
        synced_at: Option<DateTime<Utc>>,
    },
    Changed {
        stored: Fingerprint,
        synced_at: Option<DateTime<Utc>>,
    },
}

impl FingerprintStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FingerprintStatus::NeverImported => "never imported",
            FingerprintStatus::Current { .. } => "current",
            FingerprintStatus::Changed { .. } => "changed",
        }
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        match self {
            FingerprintStatus::NeverImported => None,
            FingerprintStatus::Current { synced_at } | FingerprintStatus::Changed { synced_at, .. } => {
                *synced_at
            }
        }
    }
}

/// Classify `desired` against the record in `store`.
pub fn check(
    store: &dyn FingerprintStore,
    desired: &DesiredState,
) -> Result<FingerprintStatus, FingerprintError> {
    let Some(record) = store.read(desired.target())? else {
        return Ok(FingerprintStatus::NeverImported);
    };
    let computed = fingerprint::compute(desired)?;
    if computed == record.fingerprint {
        Ok(FingerprintStatus::Current {
            synced_at: record.synced_at,
        })
    } else {
        Ok(FingerprintStatus::Changed {
            stored: record.fingerprint,
            synced_at: record.synced_at,
        })
    }
}

/// Age of a recorded import, e.g. `"42s"`, `"5m"`, `"3h"`, `"2d"`.
pub fn format_synced_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(seconds)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FileFingerprintStore, FingerprintRecord};
    use realmsync_core::RealmRepresentation;
    use tempfile::TempDir;

    fn desired(display: &str) -> DesiredState {
        let mut rep = RealmRepresentation::new("acme");
        rep.display_name = Some(display.into());
        DesiredState::new(rep)
    }

    #[test]
    fn status_progression() {
        let home = TempDir::new().unwrap();
        let store = FileFingerprintStore::new(home.path());
        let state = desired("Acme");
        assert_eq!(check(&store, &state).unwrap(), FingerprintStatus::NeverImported);

        let fp = fingerprint::compute(&state).unwrap();
        store
            .write(&FingerprintRecord::new(state.target().clone(), fp.clone()))
            .unwrap();
        let current = check(&store, &state).unwrap();
        assert!(matches!(current, FingerprintStatus::Current { synced_at: Some(_) }));

        match check(&store, &desired("Acme Corp")).unwrap() {
            FingerprintStatus::Changed { stored, .. } => assert_eq!(stored, fp),
            other => panic!("expected Changed, got {other:?}"),
        }
    }

    #[test]
    fn age_formatting_buckets() {
        assert_eq!(format_seconds(42), "42s");
        assert_eq!(format_seconds(5 * 60), "5m");
        assert_eq!(format_seconds(3 * 3600), "3h");
        assert_eq!(format_seconds(2 * 86400), "2d");
        let age = format_synced_age(Utc::now() - chrono::Duration::minutes(10));
        assert_eq!(age, "10m");
    }
}
