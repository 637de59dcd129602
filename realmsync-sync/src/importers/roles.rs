use realmsync_core::types::RoleRepresentation;
use realmsync_core::{DesiredState, ResourceKind};

use super::{encode, sync_collection, DeletionPolicy, ImportSummary, Scope, SubImporter};
use crate::error::ImportError;
use crate::remote::RemoteApi;

/// Realm roles, then client roles per owning client.
///
/// Client roles are addressed below their client, so the clients importer
/// must have run first.
pub struct RoleImporter {
    policy: DeletionPolicy,
}

impl RoleImporter {
    pub fn new(policy: DeletionPolicy) -> Self {
        Self { policy }
    }
}

fn payloads(
    kind: ResourceKind,
    roles: &[RoleRepresentation],
) -> Result<Vec<(String, serde_json::Value)>, ImportError> {
    roles
        .iter()
        .map(|role| Ok((role.name.clone(), encode(kind, &role.name, role)?)))
        .collect()
}

impl SubImporter for RoleImporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RealmRole
    }

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError> {
        let Some(roles) = &desired.representation.roles else {
            return Ok(ImportSummary::default());
        };
        let target = desired.target();
        let mut summary = ImportSummary::default();

        if let Some(realm_roles) = &roles.realm {
            let scope = Scope {
                target,
                kind: ResourceKind::RealmRole,
                parent: None,
            };
            summary += sync_collection(
                remote,
                &scope,
                payloads(ResourceKind::RealmRole, realm_roles)?,
                self.policy,
            )?;
        }

        for (client_id, client_roles) in roles.client.iter().flatten() {
            let scope = Scope {
                target,
                kind: ResourceKind::ClientRole,
                parent: Some(client_id.as_str()),
            };
            summary += sync_collection(
                remote,
                &scope,
                payloads(ResourceKind::ClientRole, client_roles)?,
                self.policy,
            )?;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::InMemoryRemote;
    use realmsync_core::types::RolesRepresentation;
    use realmsync_core::{RealmRepresentation, TargetName};

    fn role(name: &str) -> RoleRepresentation {
        RoleRepresentation {
            name: name.into(),
            settings: Default::default(),
        }
    }

    #[test]
    fn realm_and_client_roles_are_reconciled() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();

        let mut rep = RealmRepresentation::new("acme");
        rep.roles = Some(RolesRepresentation {
            realm: Some(vec![role("auditor")]),
            client: Some([("realm-management".to_string(), vec![role("custom-admin")])].into()),
        });
        let summary = RoleImporter::new(DeletionPolicy::Keep)
            .reconcile(&remote, &DesiredState::new(rep))
            .unwrap();
        assert_eq!(summary.created, 2);

        let acme = TargetName::from("acme");
        let client_roles =
            remote.resources(&acme, ResourceKind::ClientRole, Some("realm-management"));
        assert!(client_roles.iter().any(|r| r["name"] == "custom-admin"));
        assert!(client_roles.iter().any(|r| r["name"] == "impersonation"));
    }

    #[test]
    fn client_roles_of_unknown_client_fail_with_context() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();

        let mut rep = RealmRepresentation::new("acme");
        rep.roles = Some(RolesRepresentation {
            realm: None,
            client: Some([("ghost".to_string(), vec![role("reader")])].into()),
        });
        let err = RoleImporter::new(DeletionPolicy::Keep)
            .reconcile(&remote, &DesiredState::new(rep))
            .unwrap_err();
        match err {
            ImportError::Remote { kind, name, source } => {
                assert_eq!(kind, ResourceKind::ClientRole);
                assert_eq!(name, "ghost");
                assert!(matches!(source, RemoteError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
