//! Sub-resource importers.
//!
//! Each importer reconciles one family of objects below a realm. Collections
//! the desired state leaves unset (`None`) are not touched at all; an empty
//! list is a statement that the collection should be empty and only matters
//! when pruning is enabled.
//!
//! Objects are matched by their identifying key ([`resource_key`]). A remote
//! object is considered unchanged when every field of the desired object is
//! present in it with the same value; server-side defaults and ids the
//! desired state does not mention are ignored.

mod collection;
mod custom;
mod roles;
mod scope_mappings;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::AddAssign;

use serde_json::Value;

use realmsync_core::{DesiredState, ResourceKind, TargetName};

use crate::error::ImportError;
use crate::remote::{resource_id, resource_key, RemoteApi};

pub use collection::{CollectionImporter, ComponentImporter};
pub use custom::CustomImporter;
pub use roles::RoleImporter;
pub use scope_mappings::ScopeMappingImporter;

/// Reconciles one sub-resource family of a realm.
pub trait SubImporter: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError>;
}

/// What one importer did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ImportSummary {
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.deleted += rhs.deleted;
        self.unchanged += rhs.unchanged;
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged",
            self.created, self.updated, self.deleted, self.unchanged
        )
    }
}

/// What to do with remote objects absent from the desired collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    #[default]
    Keep,
    Prune,
}

// ---------------------------------------------------------------------------
// Importer set
// ---------------------------------------------------------------------------

/// The importers an orchestrator dispatches to, one per kind.
pub struct ImporterSet {
    importers: BTreeMap<ResourceKind, Box<dyn SubImporter>>,
}

impl ImporterSet {
    pub fn empty() -> Self {
        Self {
            importers: BTreeMap::new(),
        }
    }

    /// One importer for every kind the create and update sequences name.
    pub fn standard(policy: DeletionPolicy) -> Self {
        use realmsync_core::RealmRepresentation as R;
        Self::empty()
            .with(CollectionImporter::new(|r: &R| r.clients.as_ref(), policy))
            .with(RoleImporter::new(policy))
            .with(CollectionImporter::new(|r: &R| r.groups.as_ref(), policy))
            .with(CollectionImporter::new(|r: &R| r.users.as_ref(), policy))
            .with(CollectionImporter::new(
                |r: &R| r.identity_providers.as_ref(),
                policy,
            ))
            .with(CollectionImporter::new(
                |r: &R| r.authentication_flows.as_ref(),
                policy,
            ))
            .with(CollectionImporter::new(
                |r: &R| r.authenticator_config.as_ref(),
                policy,
            ))
            .with(CollectionImporter::new(
                |r: &R| r.required_actions.as_ref(),
                policy,
            ))
            .with(CollectionImporter::new(|r: &R| r.client_scopes.as_ref(), policy))
            .with(ComponentImporter::new(policy))
            .with(ScopeMappingImporter::new(policy))
            .with(CustomImporter)
    }

    /// Register `importer`, replacing any importer of the same kind.
    pub fn with(mut self, importer: impl SubImporter + 'static) -> Self {
        self.importers.insert(importer.kind(), Box::new(importer));
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&dyn SubImporter> {
        self.importers.get(&kind).map(|b| b.as_ref())
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.importers.keys().copied()
    }
}

impl Default for ImporterSet {
    fn default() -> Self {
        Self::standard(DeletionPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Shared collection reconciliation
// ---------------------------------------------------------------------------

/// Objects created by the remote system itself; never pruned.
const PROTECTED: &[(ResourceKind, &str)] = &[
    (ResourceKind::Client, "realm-management"),
    (ResourceKind::Client, "account"),
    (ResourceKind::Client, "account-console"),
    (ResourceKind::Client, "admin-cli"),
    (ResourceKind::Client, "broker"),
    (ResourceKind::Client, "security-admin-console"),
    (ResourceKind::RealmRole, "offline_access"),
    (ResourceKind::RealmRole, "uma_authorization"),
];

fn is_protected(kind: ResourceKind, key: &str, value: &Value) -> bool {
    value.get("builtIn").and_then(Value::as_bool) == Some(true)
        || PROTECTED.contains(&(kind, key))
        || (kind == ResourceKind::RealmRole && key.starts_with("default-roles-"))
}

/// One collection of a target, scoped to a parent for nested kinds.
pub(crate) struct Scope<'a> {
    pub target: &'a TargetName,
    pub kind: ResourceKind,
    pub parent: Option<&'a str>,
}

impl Scope<'_> {
    fn remote_err(&self, name: &str, source: crate::error::RemoteError) -> ImportError {
        ImportError::Remote {
            kind: self.kind,
            name: name.to_string(),
            source,
        }
    }
}

pub(crate) fn encode<T: serde::Serialize>(
    kind: ResourceKind,
    name: &str,
    item: &T,
) -> Result<Value, ImportError> {
    serde_json::to_value(item).map_err(|source| ImportError::Encode {
        kind,
        name: name.to_string(),
        source,
    })
}

/// Bring one remote collection in line with `desired` (key, payload) pairs.
pub(crate) fn sync_collection(
    remote: &dyn RemoteApi,
    scope: &Scope<'_>,
    desired: Vec<(String, Value)>,
    policy: DeletionPolicy,
) -> Result<ImportSummary, ImportError> {
    let listing_name = scope.parent.unwrap_or(scope.target.as_str());
    let existing: BTreeMap<String, Value> = remote
        .list(scope.target, scope.kind, scope.parent)
        .map_err(|e| scope.remote_err(listing_name, e))?
        .into_iter()
        .filter_map(|v| resource_key(scope.kind, &v).map(|k| (k, v)))
        .collect();

    let mut summary = ImportSummary::default();
    let mut wanted = BTreeSet::new();

    for (key, payload) in desired {
        wanted.insert(key.clone());
        match existing.get(&key) {
            None => {
                remote
                    .create_resource(scope.target, scope.kind, scope.parent, &payload)
                    .map_err(|e| scope.remote_err(&key, e))?;
                tracing::info!("created {} '{}' in {}", scope.kind, key, scope.target);
                summary.created += 1;
            }
            Some(current) if is_subset(&payload, current) => {
                tracing::debug!("unchanged: {} '{}'", scope.kind, key);
                summary.unchanged += 1;
            }
            Some(current) => {
                let id = resource_id(scope.kind, current).ok_or_else(|| {
                    scope.remote_err(
                        &key,
                        crate::error::RemoteError::Decode(format!(
                            "remote object has no '{}'",
                            scope.kind.id_field()
                        )),
                    )
                })?;
                let merged = merge(current, &payload);
                remote
                    .update_resource(scope.target, scope.kind, scope.parent, &id, &merged)
                    .map_err(|e| scope.remote_err(&key, e))?;
                tracing::info!("updated {} '{}' in {}", scope.kind, key, scope.target);
                summary.updated += 1;
            }
        }
    }

    if policy == DeletionPolicy::Prune {
        for (key, current) in &existing {
            if wanted.contains(key) || is_protected(scope.kind, key, current) {
                continue;
            }
            let Some(id) = resource_id(scope.kind, current) else {
                continue;
            };
            remote
                .delete_resource(scope.target, scope.kind, scope.parent, &id)
                .map_err(|e| scope.remote_err(key, e))?;
            tracing::info!("deleted {} '{}' from {}", scope.kind, key, scope.target);
            summary.deleted += 1;
        }
    }

    Ok(summary)
}

/// `true` when every field of `desired` appears in `current` with the same
/// value. Arrays compare exactly.
pub(crate) fn is_subset(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|h| is_subset(v, h))),
        (want, have) => want == have,
    }
}

/// `current` with the top-level fields of `desired` written over it.
fn merge(current: &Value, desired: &Value) -> Value {
    let mut merged = current.clone();
    if let (Value::Object(base), Value::Object(patch)) = (&mut merged, desired) {
        for (k, v) in patch {
            base.insert(k.clone(), v.clone());
        }
        return merged;
    }
    desired.clone()
}
