use std::collections::BTreeSet;

use serde_json::Value;

use realmsync_core::{DesiredState, ResourceKind};

use super::{encode, sync_collection, DeletionPolicy, ImportSummary, Scope, SubImporter};
use crate::error::ImportError;
use crate::remote::RemoteApi;

/// Realm-role scope mappings of client scopes and clients.
///
/// Every mapped role must already exist as a realm role; a dangling
/// reference fails before anything is sent.
pub struct ScopeMappingImporter {
    policy: DeletionPolicy,
}

impl ScopeMappingImporter {
    pub fn new(policy: DeletionPolicy) -> Self {
        Self { policy }
    }
}

impl SubImporter for ScopeMappingImporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ScopeMapping
    }

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError> {
        let Some(mappings) = &desired.representation.scope_mappings else {
            return Ok(ImportSummary::default());
        };
        let target = desired.target();

        let known: BTreeSet<String> = remote
            .list(target, ResourceKind::RealmRole, None)
            .map_err(|source| ImportError::Remote {
                kind: ResourceKind::RealmRole,
                name: target.to_string(),
                source,
            })?
            .iter()
            .filter_map(|role| role.get("name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();

        let mut payloads = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let owner = mapping.owner();
            if let Some(missing) = mapping.roles.iter().find(|r| !known.contains(*r)) {
                return Err(ImportError::MissingReference {
                    kind: ResourceKind::ScopeMapping,
                    name: owner.to_string(),
                    missing_kind: ResourceKind::RealmRole,
                    reference: missing.clone(),
                });
            }
            payloads.push((
                owner.to_string(),
                encode(ResourceKind::ScopeMapping, owner, mapping)?,
            ));
        }

        let scope = Scope {
            target,
            kind: ResourceKind::ScopeMapping,
            parent: None,
        };
        sync_collection(remote, &scope, payloads, self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use realmsync_core::types::ScopeMappingRepresentation;
    use realmsync_core::RealmRepresentation;

    fn desired(roles: &[&str]) -> DesiredState {
        let mut rep = RealmRepresentation::new("acme");
        rep.scope_mappings = Some(vec![ScopeMappingRepresentation {
            client_scope: Some("offline_access".into()),
            client: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }]);
        DesiredState::new(rep)
    }

    #[test]
    fn mapping_to_existing_role_is_created() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();
        let summary = ScopeMappingImporter::new(DeletionPolicy::Keep)
            .reconcile(&remote, &desired(&["offline_access"]))
            .unwrap();
        assert_eq!(summary.created, 1);
    }

    #[test]
    fn missing_role_is_a_missing_reference() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();
        remote.clear_journal();
        let err = ScopeMappingImporter::new(DeletionPolicy::Keep)
            .reconcile(&remote, &desired(&["offline_access", "auditor"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::MissingReference { ref reference, .. } if reference == "auditor"
        ));
        assert!(remote.mutating_calls().is_empty());
    }
}
