//! Change fingerprints: SHA-256 idempotency tracking for desired states.
//!
//! [`compute`] digests a canonical JSON form of the desired state: object keys
//! are sorted, and unordered collections (clients, users, roles, …) are sorted
//! by the canonical encoding of their elements, so reordering a file does not
//! trigger an import. Membership lists inside an element (a user's roles and
//! groups, a client's default scopes) are sorted too. Ordered lists inside an
//! element (flow executions, redirect URIs) are left as written.
//!
//! Two stores persist the last imported fingerprint per target:
//! - [`RemoteAttributeStore`]: a realm attribute on the target itself, so
//!   the value follows the realm across hosts;
//! - [`FileFingerprintStore`]: `<home>/.realmsync/fingerprints/<target>.json`,
//!   written with the same atomic `.tmp` + rename pattern as the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use realmsync_core::{config::realmsync_root, DesiredState, RealmRepresentation, TargetName};

use crate::error::{io_err, FingerprintError, RemoteError};
use crate::remote::RemoteApi;

/// Top-level collections whose element order carries no meaning.
const UNORDERED_COLLECTIONS: &[&str] = &[
    "clients",
    "groups",
    "users",
    "identityProviders",
    "authenticationFlows",
    "authenticatorConfig",
    "requiredActions",
    "clientScopes",
    "scopeMappings",
];

/// Set-valued fields inside the elements of a top-level collection.
const UNORDERED_ELEMENT_FIELDS: &[(&str, &[&str])] = &[
    ("users", &["realmRoles", "groups", "requiredActions"]),
    ("groups", &["realmRoles"]),
    ("clients", &["defaultClientScopes", "optionalClientScopes"]),
];

/// Per-client role lists inside the elements of a top-level collection.
const UNORDERED_ELEMENT_MAPS: &[(&str, &str)] =
    &[("users", "clientRoles"), ("groups", "clientRoles")];

/// Lowercase hex SHA-256 digest of a canonical desired state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A fingerprint as persisted after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub target: TargetName,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl FingerprintRecord {
    pub fn new(target: TargetName, fingerprint: Fingerprint) -> Self {
        Self {
            target,
            fingerprint,
            synced_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// compute
// ---------------------------------------------------------------------------

/// Digest `desired` into a [`Fingerprint`].
pub fn compute(desired: &DesiredState) -> Result<Fingerprint, FingerprintError> {
    let canonical = canonical_form(desired)?;
    let mut h = Sha256::new();
    h.update(canonical.to_string().as_bytes());
    Ok(Fingerprint(hex::encode(h.finalize())))
}

/// The JSON value [`compute`] hashes.
pub fn canonical_form(desired: &DesiredState) -> Result<Value, FingerprintError> {
    let mut root = serde_json::to_value(desired)?;
    let Value::Object(obj) = &mut root else {
        return Ok(root);
    };

    if let Some(groups) = obj.get_mut("groups") {
        sort_sub_groups(groups);
    }
    for (collection, fields) in UNORDERED_ELEMENT_FIELDS {
        for element in elements(obj.get_mut(*collection)) {
            for field in *fields {
                if let Some(list) = element.get_mut(*field) {
                    sort_array(list);
                }
            }
        }
    }
    for (collection, field) in UNORDERED_ELEMENT_MAPS {
        for element in elements(obj.get_mut(*collection)) {
            if let Some(Value::Object(per_client)) = element.get_mut(*field) {
                per_client.values_mut().for_each(sort_array);
            }
        }
    }
    if let Some(Value::Array(mappings)) = obj.get_mut("scopeMappings") {
        for mapping in mappings {
            if let Some(roles) = mapping.get_mut("roles") {
                sort_array(roles);
            }
        }
    }
    for key in UNORDERED_COLLECTIONS {
        if let Some(collection) = obj.get_mut(*key) {
            sort_array(collection);
        }
    }
    if let Some(Value::Object(roles)) = obj.get_mut("roles") {
        if let Some(realm) = roles.get_mut("realm") {
            sort_array(realm);
        }
        if let Some(Value::Object(per_client)) = roles.get_mut("client") {
            per_client.values_mut().for_each(sort_array);
        }
    }
    if let Some(Value::Object(components)) = obj.get_mut("components") {
        components.values_mut().for_each(sort_array);
    }
    Ok(root)
}

fn elements(collection: Option<&mut Value>) -> impl Iterator<Item = &mut Value> {
    collection
        .and_then(Value::as_array_mut)
        .into_iter()
        .flat_map(|items| items.iter_mut())
}

fn sort_array(value: &mut Value) {
    if let Value::Array(items) = value {
        items.sort_by_cached_key(|item| item.to_string());
    }
}

fn sort_sub_groups(groups: &mut Value) {
    if let Value::Array(items) = groups {
        for group in items {
            if let Some(sub) = group.get_mut("subGroups") {
                sort_sub_groups(sub);
                sort_array(sub);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Persistence for the last successfully imported fingerprint of each target.
pub trait FingerprintStore: Send + Sync {
    /// `Ok(None)` when the target was never imported.
    fn read(&self, target: &TargetName) -> Result<Option<FingerprintRecord>, FingerprintError>;

    fn write(&self, record: &FingerprintRecord) -> Result<(), FingerprintError>;
}

/// Stores fingerprints as realm attributes.
pub struct RemoteAttributeStore {
    remote: Arc<dyn RemoteApi>,
    cache_key: String,
}

impl RemoteAttributeStore {
    pub fn new(remote: Arc<dyn RemoteApi>, cache_key: impl Into<String>) -> Self {
        Self {
            remote,
            cache_key: cache_key.into(),
        }
    }

    /// `realmsync.import-fingerprint-<cache_key>`
    pub fn fingerprint_attribute(&self) -> String {
        format!("realmsync.import-fingerprint-{}", self.cache_key)
    }

    /// `realmsync.import-synced-at-<cache_key>`
    pub fn synced_at_attribute(&self) -> String {
        format!("realmsync.import-synced-at-{}", self.cache_key)
    }
}

impl FingerprintStore for RemoteAttributeStore {
    fn read(&self, target: &TargetName) -> Result<Option<FingerprintRecord>, FingerprintError> {
        let realm = match self.remote.get(target) {
            Ok(realm) => realm,
            Err(RemoteError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(attributes) = realm.attributes else {
            return Ok(None);
        };
        let Some(fingerprint) = attributes.get(&self.fingerprint_attribute()) else {
            return Ok(None);
        };
        let synced_at = attributes
            .get(&self.synced_at_attribute())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(Some(FingerprintRecord {
            target: target.clone(),
            fingerprint: Fingerprint(fingerprint.clone()),
            synced_at,
        }))
    }

    fn write(&self, record: &FingerprintRecord) -> Result<(), FingerprintError> {
        let current = self.remote.get(&record.target)?;
        let mut attributes = current.attributes.unwrap_or_default();
        attributes.insert(self.fingerprint_attribute(), record.fingerprint.0.clone());
        if let Some(synced_at) = record.synced_at {
            attributes.insert(self.synced_at_attribute(), synced_at.to_rfc3339());
        }

        let mut patch = RealmRepresentation::new(record.target.clone());
        patch.attributes = Some(attributes);
        self.remote.update(&record.target, &patch)?;
        Ok(())
    }
}

/// Stores fingerprints as JSON files below `<home>/.realmsync/fingerprints/`.
#[derive(Debug, Clone)]
pub struct FileFingerprintStore {
    home: PathBuf,
}

impl FileFingerprintStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn path_for(&self, target: &TargetName) -> PathBuf {
        store_path_at(&self.home, target)
    }
}

/// `<home>/.realmsync/fingerprints/<target>.json`, target percent-encoded.
pub fn store_path_at(home: &Path, target: &TargetName) -> PathBuf {
    realmsync_root(home)
        .join("fingerprints")
        .join(target.file_name("json"))
}

impl FingerprintStore for FileFingerprintStore {
    fn read(&self, target: &TargetName) -> Result<Option<FingerprintRecord>, FingerprintError> {
        let path = self.path_for(target);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write(&self, record: &FingerprintRecord) -> Result<(), FingerprintError> {
        let path = self.path_for(&record.target);
        let Some(dir) = path.parent() else {
            return Err(io_err(
                path,
                std::io::Error::other("invalid fingerprint store path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}
