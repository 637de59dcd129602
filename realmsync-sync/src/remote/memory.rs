//! In-memory [`RemoteApi`] with a call journal.
//!
//! Behaves like the admin API where the orchestrator depends on it:
//! - creating a realm materializes every collection carried by the payload
//!   and seeds the built-in flows, bindings and `realm-management` roles;
//! - realm updates are partial (absent fields keep their value) and ignore
//!   collections;
//! - a flow binding naming an unknown flow is rejected with status 400.
//!
//! Every call is journaled so tests can assert exactly which remote
//! operations a run issued. Rejections can be injected per kind and key.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use realmsync_core::{RealmRepresentation, ResourceKind, TargetName};

use super::{resource_id, resource_key, RemoteApi, ResourceRef};
use crate::error::RemoteError;

/// Flows every new realm starts with, bound by default.
pub const BUILTIN_FLOWS: &[&str] = &[
    "browser",
    "direct grant",
    "registration",
    "reset credentials",
    "clients",
    "docker auth",
];

/// One journaled call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Exists(TargetName),
    Create {
        target: TargetName,
        payload: RealmRepresentation,
    },
    Update {
        target: TargetName,
        payload: RealmRepresentation,
    },
    Get(TargetName),
    List {
        target: TargetName,
        kind: ResourceKind,
    },
    CreateResource {
        target: TargetName,
        kind: ResourceKind,
        key: String,
    },
    UpdateResource {
        target: TargetName,
        kind: ResourceKind,
        id: String,
    },
    DeleteResource {
        target: TargetName,
        kind: ResourceKind,
        id: String,
    },
}

impl RemoteCall {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            RemoteCall::Create { .. }
                | RemoteCall::Update { .. }
                | RemoteCall::CreateResource { .. }
                | RemoteCall::UpdateResource { .. }
                | RemoteCall::DeleteResource { .. }
        )
    }
}

type CollectionKey = (ResourceKind, Option<String>);

#[derive(Debug, Default)]
struct RealmRecord {
    representation: RealmRepresentation,
    resources: BTreeMap<CollectionKey, Vec<Value>>,
}

#[derive(Debug, Clone)]
struct Rejection {
    kind: ResourceKind,
    key: String,
    message: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    realms: BTreeMap<TargetName, RealmRecord>,
    journal: Vec<RemoteCall>,
    rejections: Vec<Rejection>,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:08x}-0000-4000-8000-{:012x}", self.next_id, self.next_id)
    }

    fn check_rejection(&self, kind: ResourceKind, key: &str) -> Result<(), RemoteError> {
        match self
            .rejections
            .iter()
            .find(|r| r.kind == kind && r.key == key)
        {
            Some(r) => Err(RemoteError::Rejected {
                status: 400,
                message: r.message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn record(&mut self, target: &TargetName) -> Result<&mut RealmRecord, RemoteError> {
        self.realms
            .get_mut(target)
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("realm '{target}'"),
            })
    }
}

/// Thread-safe in-memory stand-in for the remote admin API.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<MemoryState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call issued so far, oldest first.
    pub fn journal(&self) -> Vec<RemoteCall> {
        self.state().journal.clone()
    }

    pub fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.state()
            .journal
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Reject every create/update of `kind` whose key is `key`.
    pub fn reject(&self, kind: ResourceKind, key: impl Into<String>, message: impl Into<String>) {
        self.state().rejections.push(Rejection {
            kind,
            key: key.into(),
            message: message.into(),
        });
    }

    pub fn clear_rejections(&self) {
        self.state().rejections.clear();
    }

    /// Current realm-level representation, without touching the journal.
    pub fn realm(&self, target: &TargetName) -> Option<RealmRepresentation> {
        self.state()
            .realms
            .get(target)
            .map(|r| r.representation.clone())
    }

    /// Current objects of one collection, without touching the journal.
    pub fn resources(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
    ) -> Vec<Value> {
        self.state()
            .realms
            .get(target)
            .and_then(|r| r.resources.get(&(kind, parent.map(str::to_owned))))
            .cloned()
            .unwrap_or_default()
    }
}

impl RemoteApi for InMemoryRemote {
    fn exists(&self, target: &TargetName) -> Result<bool, RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::Exists(target.clone()));
        Ok(state.realms.contains_key(target))
    }

    fn create(&self, realm: &RealmRepresentation) -> Result<ResourceRef, RemoteError> {
        let mut state = self.state();
        let target = realm.realm.clone();
        state.journal.push(RemoteCall::Create {
            target: target.clone(),
            payload: realm.clone(),
        });
        state.check_rejection(ResourceKind::Realm, target.as_str())?;
        if state.realms.contains_key(&target) {
            return Err(RemoteError::Rejected {
                status: 409,
                message: format!("realm '{target}' already exists"),
            });
        }

        let (mut representation, collections) = split_collections(realm)?;
        let mut record = RealmRecord::default();
        seed_builtins(&mut state, &mut record, &mut representation);
        for (kind, parent, mut item) in collections {
            assign_id(&mut state, kind, &mut item);
            record
                .resources
                .entry((kind, parent))
                .or_default()
                .push(item);
        }
        check_bindings(&record, &representation)?;
        record.representation = representation;
        state.realms.insert(target.clone(), record);

        Ok(ResourceRef {
            kind: ResourceKind::Realm,
            id: target.0,
        })
    }

    fn update(&self, target: &TargetName, realm: &RealmRepresentation) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::Update {
            target: target.clone(),
            payload: realm.clone(),
        });
        state.check_rejection(ResourceKind::Realm, target.as_str())?;
        if !realm.realm.as_str().is_empty() && realm.realm != *target {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("realm name is immutable ('{target}' -> '{}')", realm.realm),
            });
        }

        let record = state.record(target)?;
        let (patch, _) = split_collections(realm)?;
        let mut merged = to_value(&record.representation)?;
        if let (Value::Object(base), Value::Object(patch)) = (&mut merged, to_value(&patch)?) {
            for (key, value) in patch {
                if key == "realm" {
                    continue;
                }
                base.insert(key, value);
            }
        }
        let updated: RealmRepresentation =
            serde_json::from_value(merged).map_err(|e| RemoteError::Decode(e.to_string()))?;
        check_bindings(record, &updated)?;
        record.representation = updated;
        Ok(())
    }

    fn get(&self, target: &TargetName) -> Result<RealmRepresentation, RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::Get(target.clone()));
        Ok(state.record(target)?.representation.clone())
    }

    fn list(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::List {
            target: target.clone(),
            kind,
        });
        let record = state.record(target)?;
        check_parent(record, kind, parent)?;
        Ok(record
            .resources
            .get(&(kind, parent.map(str::to_owned)))
            .cloned()
            .unwrap_or_default())
    }

    fn create_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        payload: &Value,
    ) -> Result<ResourceRef, RemoteError> {
        let mut state = self.state();
        let key = resource_key(kind, payload).unwrap_or_default();
        state.journal.push(RemoteCall::CreateResource {
            target: target.clone(),
            kind,
            key: key.clone(),
        });
        state.check_rejection(kind, &key)?;

        let mut item = payload.clone();
        assign_id(&mut state, kind, &mut item);
        let id = resource_id(kind, &item).unwrap_or_else(|| key.clone());

        let record = state.record(target)?;
        check_parent(record, kind, parent)?;
        let collection = record
            .resources
            .entry((kind, parent.map(str::to_owned)))
            .or_default();
        if collection
            .iter()
            .any(|v| resource_key(kind, v).as_deref() == Some(key.as_str()))
        {
            return Err(RemoteError::Rejected {
                status: 409,
                message: format!("{kind} '{key}' already exists"),
            });
        }
        collection.push(item);
        Ok(ResourceRef { kind, id })
    }

    fn update_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        id: &str,
        payload: &Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::UpdateResource {
            target: target.clone(),
            kind,
            id: id.to_string(),
        });
        if let Some(key) = resource_key(kind, payload) {
            state.check_rejection(kind, &key)?;
        }

        let record = state.record(target)?;
        check_parent(record, kind, parent)?;
        let existing = record
            .resources
            .get_mut(&(kind, parent.map(str::to_owned)))
            .and_then(|items| {
                items
                    .iter_mut()
                    .find(|v| resource_id(kind, v).as_deref() == Some(id))
            })
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("{kind} '{id}'"),
            })?;

        let server_id = existing.get("id").cloned();
        *existing = payload.clone();
        if let (Some(server_id), Value::Object(map)) = (server_id, existing) {
            map.insert("id".to_string(), server_id);
        }
        Ok(())
    }

    fn delete_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        id: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.journal.push(RemoteCall::DeleteResource {
            target: target.clone(),
            kind,
            id: id.to_string(),
        });
        let record = state.record(target)?;
        let items = record
            .resources
            .get_mut(&(kind, parent.map(str::to_owned)))
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("{kind} '{id}'"),
            })?;
        let before = items.len();
        items.retain(|v| resource_id(kind, v).as_deref() != Some(id));
        if items.len() == before {
            return Err(RemoteError::NotFound {
                what: format!("{kind} '{id}'"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn assign_id(state: &mut MemoryState, kind: ResourceKind, item: &mut Value) {
    if kind == ResourceKind::ScopeMapping {
        return;
    }
    if let Value::Object(map) = item {
        if !map.contains_key("id") {
            map.insert("id".to_string(), Value::String(state.next_id()));
        }
    }
}

fn check_parent(
    record: &RealmRecord,
    kind: ResourceKind,
    parent: Option<&str>,
) -> Result<(), RemoteError> {
    let (ResourceKind::ClientRole, Some(client_id)) = (kind, parent) else {
        return Ok(());
    };
    let clients = record.resources.get(&(ResourceKind::Client, None));
    let known = clients.is_some_and(|items| {
        items
            .iter()
            .any(|c| c.get("clientId").and_then(Value::as_str) == Some(client_id))
    });
    if known {
        Ok(())
    } else {
        Err(RemoteError::NotFound {
            what: format!("client '{client_id}'"),
        })
    }
}

fn check_bindings(record: &RealmRecord, rep: &RealmRepresentation) -> Result<(), RemoteError> {
    let flows = record.resources.get(&(ResourceKind::AuthenticationFlow, None));
    let bindings = [
        &rep.browser_flow,
        &rep.direct_grant_flow,
        &rep.client_authentication_flow,
        &rep.docker_authentication_flow,
        &rep.registration_flow,
        &rep.reset_credentials_flow,
    ];
    for alias in bindings.into_iter().flatten() {
        let known = flows.is_some_and(|items| {
            items
                .iter()
                .any(|f| f.get("alias").and_then(Value::as_str) == Some(alias.as_str()))
        });
        if !known {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("flow '{alias}' not found"),
            });
        }
    }
    Ok(())
}

fn seed_builtins(
    state: &mut MemoryState,
    record: &mut RealmRecord,
    representation: &mut RealmRepresentation,
) {
    let mut flows = Vec::new();
    for alias in BUILTIN_FLOWS {
        let mut flow = serde_json::json!({ "alias": alias, "builtIn": true, "topLevel": true });
        assign_id(state, ResourceKind::AuthenticationFlow, &mut flow);
        flows.push(flow);
    }
    record
        .resources
        .insert((ResourceKind::AuthenticationFlow, None), flows);

    let defaults = [
        (&mut representation.browser_flow, "browser"),
        (&mut representation.direct_grant_flow, "direct grant"),
        (&mut representation.registration_flow, "registration"),
        (&mut representation.reset_credentials_flow, "reset credentials"),
        (&mut representation.client_authentication_flow, "clients"),
        (&mut representation.docker_authentication_flow, "docker auth"),
    ];
    for (binding, alias) in defaults {
        if binding.is_none() {
            *binding = Some(alias.to_string());
        }
    }

    let mut management = serde_json::json!({ "clientId": "realm-management", "bearerOnly": true });
    assign_id(state, ResourceKind::Client, &mut management);
    record
        .resources
        .insert((ResourceKind::Client, None), vec![management]);

    let mut impersonation = serde_json::json!({ "name": "impersonation" });
    assign_id(state, ResourceKind::ClientRole, &mut impersonation);
    record.resources.insert(
        (ResourceKind::ClientRole, Some("realm-management".to_string())),
        vec![impersonation],
    );

    let mut realm_roles = Vec::new();
    for name in ["offline_access", "uma_authorization"] {
        let mut role = serde_json::json!({ "name": name });
        assign_id(state, ResourceKind::RealmRole, &mut role);
        realm_roles.push(role);
    }
    record
        .resources
        .insert((ResourceKind::RealmRole, None), realm_roles);
}

/// Separate the realm-level fields from the collections a payload carries.
fn split_collections(
    realm: &RealmRepresentation,
) -> Result<(RealmRepresentation, Vec<(ResourceKind, Option<String>, Value)>), RemoteError> {
    let mut level = realm.clone();
    let mut items = Vec::new();

    fn push_all<T: serde::Serialize>(
        items: &mut Vec<(ResourceKind, Option<String>, Value)>,
        kind: ResourceKind,
        parent: Option<&str>,
        list: Option<Vec<T>>,
    ) -> Result<(), RemoteError> {
        for item in list.into_iter().flatten() {
            items.push((kind, parent.map(str::to_owned), to_value(&item)?));
        }
        Ok(())
    }

    push_all(&mut items, ResourceKind::Client, None, level.clients.take())?;
    if let Some(roles) = level.roles.take() {
        push_all(&mut items, ResourceKind::RealmRole, None, roles.realm)?;
        for (client_id, list) in roles.client.into_iter().flatten() {
            push_all(&mut items, ResourceKind::ClientRole, Some(client_id.as_str()), Some(list))?;
        }
    }
    push_all(&mut items, ResourceKind::Group, None, level.groups.take())?;
    push_all(&mut items, ResourceKind::User, None, level.users.take())?;
    push_all(
        &mut items,
        ResourceKind::IdentityProvider,
        None,
        level.identity_providers.take(),
    )?;
    push_all(
        &mut items,
        ResourceKind::AuthenticationFlow,
        None,
        level.authentication_flows.take(),
    )?;
    push_all(
        &mut items,
        ResourceKind::AuthenticatorConfig,
        None,
        level.authenticator_config.take(),
    )?;
    push_all(
        &mut items,
        ResourceKind::RequiredAction,
        None,
        level.required_actions.take(),
    )?;
    for (provider_type, list) in level.components.take().into_iter().flatten() {
        for component in list {
            let mut value = to_value(&component)?;
            if let Value::Object(map) = &mut value {
                map.insert("providerType".to_string(), Value::String(provider_type.clone()));
            }
            items.push((ResourceKind::Component, None, value));
        }
    }
    push_all(&mut items, ResourceKind::ClientScope, None, level.client_scopes.take())?;
    push_all(&mut items, ResourceKind::ScopeMapping, None, level.scope_mappings.take())?;

    Ok((level, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmsync_core::types::ClientRepresentation;
    use serde_json::json;

    fn acme() -> TargetName {
        TargetName::from("acme")
    }

    #[test]
    fn create_materializes_collections_and_builtins() {
        let remote = InMemoryRemote::new();
        let mut realm = RealmRepresentation::new("acme");
        realm.clients = Some(vec![ClientRepresentation {
            client_id: "web".into(),
            settings: Default::default(),
        }]);
        remote.create(&realm).unwrap();

        let stored = remote.realm(&acme()).unwrap();
        assert!(stored.clients.is_none(), "collections are not realm-level state");
        assert_eq!(stored.browser_flow.as_deref(), Some("browser"));

        let clients = remote.resources(&acme(), ResourceKind::Client, None);
        assert!(clients.iter().any(|c| c["clientId"] == "web" && c.get("id").is_some()));
        assert_eq!(
            remote
                .resources(&acme(), ResourceKind::AuthenticationFlow, None)
                .len(),
            BUILTIN_FLOWS.len()
        );
    }

    #[test]
    fn update_is_partial_and_validates_bindings() {
        let remote = InMemoryRemote::new();
        let mut realm = RealmRepresentation::new("acme");
        realm.display_name = Some("Acme".into());
        remote.create(&realm).unwrap();

        let mut patch = RealmRepresentation::new("acme");
        patch.enabled = Some(true);
        remote.update(&acme(), &patch).unwrap();
        let stored = remote.realm(&acme()).unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Acme"));
        assert_eq!(stored.enabled, Some(true));

        let mut bad = RealmRepresentation::new("acme");
        bad.browser_flow = Some("missing".into());
        let err = remote.update(&acme(), &bad).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
    }

    #[test]
    fn resource_crud_and_conflicts() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();

        let created = remote
            .create_resource(&acme(), ResourceKind::User, None, &json!({ "username": "jane" }))
            .unwrap();
        let dup = remote
            .create_resource(&acme(), ResourceKind::User, None, &json!({ "username": "jane" }))
            .unwrap_err();
        assert!(matches!(dup, RemoteError::Rejected { status: 409, .. }));

        remote
            .update_resource(
                &acme(),
                ResourceKind::User,
                None,
                &created.id,
                &json!({ "username": "jane", "enabled": false }),
            )
            .unwrap();
        let users = remote.resources(&acme(), ResourceKind::User, None);
        assert_eq!(users[0]["id"], Value::String(created.id.clone()));
        assert_eq!(users[0]["enabled"], Value::Bool(false));

        remote
            .delete_resource(&acme(), ResourceKind::User, None, &created.id)
            .unwrap();
        assert!(remote.resources(&acme(), ResourceKind::User, None).is_empty());
    }

    #[test]
    fn client_roles_require_existing_client() {
        let remote = InMemoryRemote::new();
        remote.create(&RealmRepresentation::new("acme")).unwrap();
        let err = remote
            .list(&acme(), ResourceKind::ClientRole, Some("ghost"))
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
        let roles = remote
            .list(&acme(), ResourceKind::ClientRole, Some("realm-management"))
            .unwrap();
        assert_eq!(roles[0]["name"], "impersonation");
    }

    #[test]
    fn injected_rejection_and_journal() {
        let remote = InMemoryRemote::new();
        remote.reject(ResourceKind::Realm, "acme", "realm disabled by policy");
        let err = remote.create(&RealmRepresentation::new("acme")).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rejected {
                status: 400,
                message: "realm disabled by policy".into()
            }
        );
        assert!(matches!(
            remote.journal().as_slice(),
            [RemoteCall::Create { target, .. }] if *target == acme()
        ));
        assert_eq!(remote.mutating_calls().len(), 1);

        remote.clear_journal();
        assert!(!remote.exists(&acme()).unwrap());
        assert!(remote.mutating_calls().is_empty());
    }
}
