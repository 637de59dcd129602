//! Domain types for realm reconciliation.
//!
//! The representation types mirror the remote admin API's JSON shape
//! (`camelCase` keys). Every struct carries a flattened `settings`/`other`
//! map so that fields this crate does not model explicitly (server-managed
//! ids, defaults, vendor extensions) round-trip untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form fields of a sub-resource that are not part of its identity.
pub type Settings = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of one independently reconciled target (a realm).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct TargetName(pub String);

impl TargetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for per-target state, with the name percent-encoded so that
    /// separators and `..` cannot leave the containing directory.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", urlencoding::encode(&self.0), extension)
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TargetName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of a remote object, used for routing API calls and for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Realm,
    Client,
    RealmRole,
    ClientRole,
    Group,
    User,
    IdentityProvider,
    AuthenticationFlow,
    AuthenticatorConfig,
    RequiredAction,
    Component,
    ClientScope,
    ScopeMapping,
    CustomImport,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Realm => "realm",
            ResourceKind::Client => "client",
            ResourceKind::RealmRole => "realm role",
            ResourceKind::ClientRole => "client role",
            ResourceKind::Group => "group",
            ResourceKind::User => "user",
            ResourceKind::IdentityProvider => "identity provider",
            ResourceKind::AuthenticationFlow => "authentication flow",
            ResourceKind::AuthenticatorConfig => "authenticator config",
            ResourceKind::RequiredAction => "required action",
            ResourceKind::Component => "component",
            ResourceKind::ClientScope => "client scope",
            ResourceKind::ScopeMapping => "scope mapping",
            ResourceKind::CustomImport => "custom import",
        }
    }

    /// JSON field holding the human-facing identity of an object of this kind.
    pub fn key_field(self) -> &'static str {
        match self {
            ResourceKind::Realm => "realm",
            ResourceKind::Client => "clientId",
            ResourceKind::User => "username",
            ResourceKind::IdentityProvider
            | ResourceKind::AuthenticationFlow
            | ResourceKind::AuthenticatorConfig
            | ResourceKind::RequiredAction => "alias",
            ResourceKind::ScopeMapping => "clientScope",
            ResourceKind::RealmRole
            | ResourceKind::ClientRole
            | ResourceKind::Group
            | ResourceKind::Component
            | ResourceKind::ClientScope
            | ResourceKind::CustomImport => "name",
        }
    }

    /// JSON field the remote API addresses an existing object by.
    ///
    /// Roles are addressed by name, identity providers and required actions by
    /// alias; everything else by the server-assigned `id`.
    pub fn id_field(self) -> &'static str {
        match self {
            ResourceKind::Realm => "realm",
            ResourceKind::RealmRole | ResourceKind::ClientRole => "name",
            ResourceKind::IdentityProvider | ResourceKind::RequiredAction => "alias",
            ResourceKind::ScopeMapping => "clientScope",
            _ => "id",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sub-resource representations
// ---------------------------------------------------------------------------

/// A sub-resource element with a stable identifying key.
pub trait Keyed {
    const KIND: ResourceKind;

    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    pub client_id: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRepresentation {
    pub name: String,
    #[serde(flatten)]
    pub settings: Settings,
}

/// Realm roles plus client roles grouped by `clientId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RolesRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<Vec<RoleRepresentation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<BTreeMap<String, Vec<RoleRepresentation>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRepresentation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_groups: Option<Vec<GroupRepresentation>>,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRepresentation {
    pub username: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProviderRepresentation {
    pub alias: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationFlowRepresentation {
    pub alias: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatorConfigRepresentation {
    pub alias: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredActionRepresentation {
    pub alias: String,
    #[serde(flatten)]
    pub settings: Settings,
}

/// A component; its provider type is the key it is grouped under in
/// [`RealmRepresentation::components`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRepresentation {
    pub name: String,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientScopeRepresentation {
    pub name: String,
    #[serde(flatten)]
    pub settings: Settings,
}

/// Realm roles granted to a client scope (or to a client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMappingRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ScopeMappingRepresentation {
    /// The scope or client this mapping belongs to.
    pub fn owner(&self) -> &str {
        self.client_scope
            .as_deref()
            .or(self.client.as_deref())
            .unwrap_or_default()
    }
}

macro_rules! keyed {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl Keyed for $ty {
            const KIND: ResourceKind = $kind;

            fn key(&self) -> &str {
                &self.$field
            }
        }
    };
}

keyed!(ClientRepresentation, ResourceKind::Client, client_id);
keyed!(GroupRepresentation, ResourceKind::Group, name);
keyed!(UserRepresentation, ResourceKind::User, username);
keyed!(IdentityProviderRepresentation, ResourceKind::IdentityProvider, alias);
keyed!(AuthenticationFlowRepresentation, ResourceKind::AuthenticationFlow, alias);
keyed!(AuthenticatorConfigRepresentation, ResourceKind::AuthenticatorConfig, alias);
keyed!(RequiredActionRepresentation, ResourceKind::RequiredAction, alias);
keyed!(ComponentRepresentation, ResourceKind::Component, name);
keyed!(ClientScopeRepresentation, ResourceKind::ClientScope, name);

// ---------------------------------------------------------------------------
// Realm
// ---------------------------------------------------------------------------

/// Full representation of one realm, as exchanged with the remote admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RealmRepresentation {
    pub realm: TargetName,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_required: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_allowed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_lifespan: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,

    // Flow bindings: aliases of authentication flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_grant_flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_authentication_flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_authentication_flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_credentials_flow: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<RolesRepresentation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_providers: Option<Vec<IdentityProviderRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_flows: Option<Vec<AuthenticationFlowRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_config: Option<Vec<AuthenticatorConfigRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_actions: Option<Vec<RequiredActionRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, Vec<ComponentRepresentation>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_scopes: Option<Vec<ClientScopeRepresentation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_mappings: Option<Vec<ScopeMappingRepresentation>>,

    /// Every field not modelled above.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl RealmRepresentation {
    pub fn new(realm: impl Into<TargetName>) -> Self {
        Self {
            realm: realm.into(),
            ..Self::default()
        }
    }
}

/// Options handled by the custom-import step rather than the remote schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomImport {
    /// Remove the `impersonation` role from the `realm-management` client.
    pub remove_impersonation: bool,
}

/// The declarative description of one target: the realm plus import options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    #[serde(flatten)]
    pub representation: RealmRepresentation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_import: Option<CustomImport>,
}

impl DesiredState {
    pub fn new(representation: RealmRepresentation) -> Self {
        Self {
            representation,
            custom_import: None,
        }
    }

    pub fn target(&self) -> &TargetName {
        &self.representation.realm
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
