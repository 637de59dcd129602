use serde::Serialize;
use serde_json::Value;

use realmsync_core::types::ComponentRepresentation;
use realmsync_core::{DesiredState, Keyed, RealmRepresentation, ResourceKind};

use super::{encode, sync_collection, DeletionPolicy, ImportSummary, Scope, SubImporter};
use crate::error::ImportError;
use crate::remote::RemoteApi;

/// Selects one collection of a realm representation.
pub type Selector<T> = fn(&RealmRepresentation) -> Option<&Vec<T>>;

/// Importer for a flat, realm-level collection of keyed objects.
pub struct CollectionImporter<T> {
    select: Selector<T>,
    policy: DeletionPolicy,
}

impl<T> CollectionImporter<T> {
    pub fn new(select: Selector<T>, policy: DeletionPolicy) -> Self {
        Self { select, policy }
    }
}

impl<T> SubImporter for CollectionImporter<T>
where
    T: Keyed + Serialize + Send + Sync,
{
    fn kind(&self) -> ResourceKind {
        T::KIND
    }

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError> {
        let Some(items) = (self.select)(&desired.representation) else {
            return Ok(ImportSummary::default());
        };
        let payloads = items
            .iter()
            .map(|item| Ok((item.key().to_string(), encode(T::KIND, item.key(), item)?)))
            .collect::<Result<Vec<_>, ImportError>>()?;
        let scope = Scope {
            target: desired.target(),
            kind: T::KIND,
            parent: None,
        };
        sync_collection(remote, &scope, payloads, self.policy)
    }
}

/// Importer for components, which the desired state groups by provider type.
pub struct ComponentImporter {
    policy: DeletionPolicy,
}

impl ComponentImporter {
    pub fn new(policy: DeletionPolicy) -> Self {
        Self { policy }
    }
}

impl SubImporter for ComponentImporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Component
    }

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError> {
        let Some(groups) = &desired.representation.components else {
            return Ok(ImportSummary::default());
        };
        let mut payloads = Vec::new();
        for (provider_type, components) in groups {
            for component in components {
                payloads.push(component_payload(provider_type, component)?);
            }
        }
        let scope = Scope {
            target: desired.target(),
            kind: ResourceKind::Component,
            parent: None,
        };
        sync_collection(remote, &scope, payloads, self.policy)
    }
}

fn component_payload(
    provider_type: &str,
    component: &ComponentRepresentation,
) -> Result<(String, Value), ImportError> {
    let mut value = encode(ResourceKind::Component, &component.name, component)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            "providerType".to_string(),
            Value::String(provider_type.to_string()),
        );
    }
    Ok((format!("{provider_type}/{}", component.name), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use realmsync_core::types::ClientRepresentation;
    use realmsync_core::TargetName;
    use serde_json::json;

    fn realm() -> InMemoryRemote {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();
        remote
    }

    #[test]
    fn unset_collection_is_left_alone() {
        let remote = realm();
        remote.clear_journal();
        let importer = CollectionImporter::new(
            |r: &RealmRepresentation| r.clients.as_ref(),
            DeletionPolicy::Prune,
        );
        let summary = importer
            .reconcile(&remote, &DesiredState::new(RealmRepresentation::new("acme")))
            .unwrap();
        assert_eq!(summary, ImportSummary::default());
        assert!(remote.journal().is_empty(), "no call for an unset collection");
    }

    #[test]
    fn clients_are_created_by_client_id() {
        let remote = realm();
        let mut rep = RealmRepresentation::new("acme");
        let mut client = ClientRepresentation {
            client_id: "web".into(),
            settings: Default::default(),
        };
        client.settings.insert("publicClient".into(), json!(true));
        rep.clients = Some(vec![client]);

        let importer = CollectionImporter::new(
            |r: &RealmRepresentation| r.clients.as_ref(),
            DeletionPolicy::Keep,
        );
        assert_eq!(importer.kind(), ResourceKind::Client);
        let summary = importer.reconcile(&remote, &DesiredState::new(rep)).unwrap();
        assert_eq!(summary.created, 1);

        let clients = remote.resources(&TargetName::from("acme"), ResourceKind::Client, None);
        assert!(clients
            .iter()
            .any(|c| c["clientId"] == "web" && c["publicClient"] == json!(true)));
    }

    #[test]
    fn components_carry_provider_type() {
        let remote = realm();
        let mut rep = RealmRepresentation::new("acme");
        rep.components = Some(
            [(
                "org.keycloak.keys.KeyProvider".to_string(),
                vec![ComponentRepresentation {
                    name: "rsa-generated".into(),
                    settings: Default::default(),
                }],
            )]
            .into_iter()
            .collect(),
        );
        let desired = DesiredState::new(rep);
        let importer = ComponentImporter::new(DeletionPolicy::Keep);
        assert_eq!(importer.reconcile(&remote, &desired).unwrap().created, 1);
        assert_eq!(importer.reconcile(&remote, &desired).unwrap().unchanged, 1);

        let stored = remote.resources(&TargetName::from("acme"), ResourceKind::Component, None);
        assert_eq!(stored[0]["providerType"], "org.keycloak.keys.KeyProvider");
    }
}
