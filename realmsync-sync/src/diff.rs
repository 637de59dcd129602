//! Realm-level unified diff support for `realmsync diff`.
//!
//! Compares the remote realm with what an update run would send for it:
//! the realm-level fields of the update projection plus the flow bindings.
//! Sub-resource collections are reconciled object by object and are not
//! part of this diff. Nothing is sent to the remote beyond reads.

use serde_json::{Map, Value};
use similar::TextDiff;

use realmsync_core::{DesiredState, RealmRepresentation, TargetName};

use crate::error::RemoteError;
use crate::projector::{self, RealmField, UPDATE_MASK};
use crate::remote::RemoteApi;

/// Attribute prefix used for bookkeeping; never part of a desired state.
const BOOKKEEPING_ATTRIBUTE_PREFIX: &str = "realmsync.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmDiff {
    pub target: TargetName,
    /// `false` when the realm would be created.
    pub exists: bool,
    /// Empty when nothing would change.
    pub unified_diff: String,
}

impl RealmDiff {
    pub fn is_empty(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

/// Diff the remote realm against the realm-level payload `desired` implies.
pub fn diff_realm(remote: &dyn RemoteApi, desired: &DesiredState) -> Result<RealmDiff, RemoteError> {
    let target = desired.target().clone();
    let wanted = owned_fields(desired)?;

    let exists = remote.exists(&target)?;
    let current = if exists {
        restrict(&remote.get(&target)?, &wanted)?
    } else {
        Map::new()
    };

    let old = pretty(&current)?;
    let new = pretty(&wanted)?;
    let unified_diff = if old == new {
        String::new()
    } else {
        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(&format!("a/{target}"), &format!("b/{target}"))
            .context_radius(3)
            .to_string()
    };

    Ok(RealmDiff {
        target,
        exists,
        unified_diff,
    })
}

fn to_object(rep: &RealmRepresentation) -> Result<Map<String, Value>, RemoteError> {
    match serde_json::to_value(rep) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RemoteError::Decode(format!("expected an object, got {other}"))),
        Err(e) => Err(RemoteError::Decode(e.to_string())),
    }
}

fn owned_fields(desired: &DesiredState) -> Result<Map<String, Value>, RemoteError> {
    let mut payload = projector::project(desired, &UPDATE_MASK);
    for field in RealmField::FLOW_BINDINGS {
        field.copy(&desired.representation, &mut payload);
    }
    to_object(&payload)
}

/// The fields of `current` that `wanted` also names.
fn restrict(
    current: &RealmRepresentation,
    wanted: &Map<String, Value>,
) -> Result<Map<String, Value>, RemoteError> {
    let mut current = to_object(current)?;
    if let Some(Value::Object(attributes)) = current.get_mut("attributes") {
        attributes.retain(|k, _| !k.starts_with(BOOKKEEPING_ATTRIBUTE_PREFIX));
    }
    current.retain(|k, _| wanted.contains_key(k));
    Ok(current)
}

fn pretty(map: &Map<String, Value>) -> Result<String, RemoteError> {
    let mut text = serde_json::to_string_pretty(map).map_err(|e| RemoteError::Decode(e.to_string()))?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    fn desired(display: &str) -> DesiredState {
        let mut rep = RealmRepresentation::new("acme");
        rep.display_name = Some(display.into());
        rep.browser_flow = Some("browser".into());
        DesiredState::new(rep)
    }

    #[test]
    fn missing_realm_diffs_against_nothing() {
        let remote = InMemoryRemote::new();
        let diff = diff_realm(&remote, &desired("Acme")).expect("diff");
        assert!(!diff.exists);
        assert!(diff.unified_diff.contains("+  \"displayName\": \"Acme\""));
    }

    #[test]
    fn matching_realm_has_empty_diff() {
        let remote = InMemoryRemote::new();
        let mut rep = RealmRepresentation::new("acme");
        rep.display_name = Some("Acme".into());
        rep.attributes = Some([("realmsync.import-fingerprint-default".to_string(), "x".to_string())].into());
        remote.create(&rep).unwrap();

        let diff = diff_realm(&remote, &desired("Acme")).expect("diff");
        assert!(diff.exists);
        assert!(diff.is_empty(), "unexpected diff:\n{}", diff.unified_diff);
    }

    #[test]
    fn changed_field_shows_both_sides() {
        let remote = InMemoryRemote::new();
        let mut rep = RealmRepresentation::new("acme");
        rep.display_name = Some("Acme".into());
        remote.create(&rep).unwrap();
        remote.clear_journal();

        let diff = diff_realm(&remote, &desired("Acme Corp")).expect("diff");
        assert!(diff.unified_diff.contains("-  \"displayName\": \"Acme\""));
        assert!(diff.unified_diff.contains("+  \"displayName\": \"Acme Corp\""));
        assert!(remote.mutating_calls().is_empty());
    }
}
