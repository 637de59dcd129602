//! The remote admin API as seen by the orchestrator and the importers.
//!
//! All calls are blocking and issued sequentially for one target: later calls
//! depend on what earlier ones observed (existence, fresh ids, re-fetched
//! state). Implementations must be shareable across threads so that distinct
//! targets can be reconciled concurrently.

pub mod memory;

use serde_json::Value;

use realmsync_core::{RealmRepresentation, ResourceKind, TargetName};

use crate::error::RemoteError;

pub use memory::{InMemoryRemote, RemoteCall};

/// Reference to an object the remote system just created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

/// Administrative operations on realms and their sub-resources.
///
/// `parent` scopes kinds that live below another object; today that is only
/// [`ResourceKind::ClientRole`], whose parent is the owning `clientId`.
pub trait RemoteApi: Send + Sync {
    fn exists(&self, target: &TargetName) -> Result<bool, RemoteError>;

    fn create(&self, realm: &RealmRepresentation) -> Result<ResourceRef, RemoteError>;

    /// Partial update: fields absent from `realm` keep their remote value.
    fn update(&self, target: &TargetName, realm: &RealmRepresentation) -> Result<(), RemoteError>;

    fn get(&self, target: &TargetName) -> Result<RealmRepresentation, RemoteError>;

    fn list(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError>;

    fn create_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        payload: &Value,
    ) -> Result<ResourceRef, RemoteError>;

    fn update_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        id: &str,
        payload: &Value,
    ) -> Result<(), RemoteError>;

    fn delete_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        id: &str,
    ) -> Result<(), RemoteError>;
}

/// Identifying key of a remote object, matching [`realmsync_core::Keyed::key`]
/// for the desired side.
///
/// Components are keyed by `providerType/name` since names only need to be
/// unique per provider type; scope mappings by their owning scope or client.
pub fn resource_key(kind: ResourceKind, value: &Value) -> Option<String> {
    let field = |name: &str| value.get(name).and_then(Value::as_str);
    match kind {
        ResourceKind::Component => {
            let name = field("name")?;
            Some(match field("providerType") {
                Some(provider_type) => format!("{provider_type}/{name}"),
                None => name.to_string(),
            })
        }
        ResourceKind::ScopeMapping => field("clientScope")
            .or_else(|| field("client"))
            .map(str::to_owned),
        kind => field(kind.key_field()).map(str::to_owned),
    }
}

/// The id the remote API addresses an existing object by.
pub fn resource_id(kind: ResourceKind, value: &Value) -> Option<String> {
    match kind {
        ResourceKind::ScopeMapping => resource_key(kind, value),
        kind => value
            .get(kind.id_field())
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}
