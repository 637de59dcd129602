//! Field-scoped projections of a desired state into remote payloads.
//!
//! Which fields a payload may carry is decided by a [`FieldMask`]: a named,
//! versioned constant over the [`RealmField`] enum. Adding a field to the
//! representation without deciding its mask membership fails to compile in
//! [`RealmField::clear`] and [`RealmField::copy`].
//!
//! Both operations are pure: the inputs are never mutated and the same
//! inputs always produce the same payload.

use realmsync_core::{DesiredState, RealmRepresentation};

/// A realm field that some phase of a run must keep out of (or restrict to)
/// its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RealmField {
    Clients,
    Roles,
    Groups,
    Users,
    IdentityProviders,
    AuthenticationFlows,
    AuthenticatorConfig,
    RequiredActions,
    Components,
    ClientScopes,
    ScopeMappings,
    BrowserFlow,
    DirectGrantFlow,
    ClientAuthenticationFlow,
    DockerAuthenticationFlow,
    RegistrationFlow,
    ResetCredentialsFlow,
}

impl RealmField {
    pub const ALL: &'static [RealmField] = &[
        RealmField::Clients,
        RealmField::Roles,
        RealmField::Groups,
        RealmField::Users,
        RealmField::IdentityProviders,
        RealmField::AuthenticationFlows,
        RealmField::AuthenticatorConfig,
        RealmField::RequiredActions,
        RealmField::Components,
        RealmField::ClientScopes,
        RealmField::ScopeMappings,
        RealmField::BrowserFlow,
        RealmField::DirectGrantFlow,
        RealmField::ClientAuthenticationFlow,
        RealmField::DockerAuthenticationFlow,
        RealmField::RegistrationFlow,
        RealmField::ResetCredentialsFlow,
    ];

    pub const FLOW_BINDINGS: &'static [RealmField] = &[
        RealmField::BrowserFlow,
        RealmField::DirectGrantFlow,
        RealmField::ClientAuthenticationFlow,
        RealmField::DockerAuthenticationFlow,
        RealmField::RegistrationFlow,
        RealmField::ResetCredentialsFlow,
    ];

    /// JSON key on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            RealmField::Clients => "clients",
            RealmField::Roles => "roles",
            RealmField::Groups => "groups",
            RealmField::Users => "users",
            RealmField::IdentityProviders => "identityProviders",
            RealmField::AuthenticationFlows => "authenticationFlows",
            RealmField::AuthenticatorConfig => "authenticatorConfig",
            RealmField::RequiredActions => "requiredActions",
            RealmField::Components => "components",
            RealmField::ClientScopes => "clientScopes",
            RealmField::ScopeMappings => "scopeMappings",
            RealmField::BrowserFlow => "browserFlow",
            RealmField::DirectGrantFlow => "directGrantFlow",
            RealmField::ClientAuthenticationFlow => "clientAuthenticationFlow",
            RealmField::DockerAuthenticationFlow => "dockerAuthenticationFlow",
            RealmField::RegistrationFlow => "registrationFlow",
            RealmField::ResetCredentialsFlow => "resetCredentialsFlow",
        }
    }

    pub fn is_flow_binding(self) -> bool {
        Self::FLOW_BINDINGS.contains(&self)
    }

    /// The flow alias this binding field holds in `rep`, if any.
    pub fn flow_alias(self, rep: &RealmRepresentation) -> Option<&str> {
        let alias = match self {
            RealmField::BrowserFlow => &rep.browser_flow,
            RealmField::DirectGrantFlow => &rep.direct_grant_flow,
            RealmField::ClientAuthenticationFlow => &rep.client_authentication_flow,
            RealmField::DockerAuthenticationFlow => &rep.docker_authentication_flow,
            RealmField::RegistrationFlow => &rep.registration_flow,
            RealmField::ResetCredentialsFlow => &rep.reset_credentials_flow,
            _ => return None,
        };
        alias.as_deref()
    }

    /// Remove this field from `rep`.
    pub fn clear(self, rep: &mut RealmRepresentation) {
        match self {
            RealmField::Clients => rep.clients = None,
            RealmField::Roles => rep.roles = None,
            RealmField::Groups => rep.groups = None,
            RealmField::Users => rep.users = None,
            RealmField::IdentityProviders => rep.identity_providers = None,
            RealmField::AuthenticationFlows => rep.authentication_flows = None,
            RealmField::AuthenticatorConfig => rep.authenticator_config = None,
            RealmField::RequiredActions => rep.required_actions = None,
            RealmField::Components => rep.components = None,
            RealmField::ClientScopes => rep.client_scopes = None,
            RealmField::ScopeMappings => rep.scope_mappings = None,
            RealmField::BrowserFlow => rep.browser_flow = None,
            RealmField::DirectGrantFlow => rep.direct_grant_flow = None,
            RealmField::ClientAuthenticationFlow => rep.client_authentication_flow = None,
            RealmField::DockerAuthenticationFlow => rep.docker_authentication_flow = None,
            RealmField::RegistrationFlow => rep.registration_flow = None,
            RealmField::ResetCredentialsFlow => rep.reset_credentials_flow = None,
        }
    }

    /// Copy this field from `from` onto `to` when `from` has a value.
    pub fn copy(self, from: &RealmRepresentation, to: &mut RealmRepresentation) {
        fn set<T: Clone>(src: &Option<T>, dst: &mut Option<T>) {
            if let Some(value) = src {
                *dst = Some(value.clone());
            }
        }
        match self {
            RealmField::Clients => set(&from.clients, &mut to.clients),
            RealmField::Roles => set(&from.roles, &mut to.roles),
            RealmField::Groups => set(&from.groups, &mut to.groups),
            RealmField::Users => set(&from.users, &mut to.users),
            RealmField::IdentityProviders => set(&from.identity_providers, &mut to.identity_providers),
            RealmField::AuthenticationFlows => {
                set(&from.authentication_flows, &mut to.authentication_flows)
            }
            RealmField::AuthenticatorConfig => {
                set(&from.authenticator_config, &mut to.authenticator_config)
            }
            RealmField::RequiredActions => set(&from.required_actions, &mut to.required_actions),
            RealmField::Components => set(&from.components, &mut to.components),
            RealmField::ClientScopes => set(&from.client_scopes, &mut to.client_scopes),
            RealmField::ScopeMappings => set(&from.scope_mappings, &mut to.scope_mappings),
            RealmField::BrowserFlow => set(&from.browser_flow, &mut to.browser_flow),
            RealmField::DirectGrantFlow => set(&from.direct_grant_flow, &mut to.direct_grant_flow),
            RealmField::ClientAuthenticationFlow => {
                set(&from.client_authentication_flow, &mut to.client_authentication_flow)
            }
            RealmField::DockerAuthenticationFlow => {
                set(&from.docker_authentication_flow, &mut to.docker_authentication_flow)
            }
            RealmField::RegistrationFlow => set(&from.registration_flow, &mut to.registration_flow),
            RealmField::ResetCredentialsFlow => {
                set(&from.reset_credentials_flow, &mut to.reset_credentials_flow)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Masks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMode {
    /// Everything except the listed fields.
    Exclude,
    /// Only the listed fields (plus the realm name).
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMask {
    pub name: &'static str,
    pub version: u32,
    pub mode: MaskMode,
    fields: &'static [RealmField],
}

impl FieldMask {
    pub fn contains(&self, field: RealmField) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> &'static [RealmField] {
        self.fields
    }

    pub fn wire_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.wire_name()).collect()
    }

    /// Whether a payload built with this mask may carry `field`.
    pub fn selects(&self, field: RealmField) -> bool {
        match self.mode {
            MaskMode::Exclude => !self.contains(field),
            MaskMode::Include => self.contains(field),
        }
    }
}

/// Fields withheld from the initial create payload. Users and groups go
/// through their importers so that credentials and memberships are applied
/// individually; flows and components must exist before anything can bind
/// to them.
pub const CREATION_MASK: FieldMask = FieldMask {
    name: "creation",
    version: 1,
    mode: MaskMode::Exclude,
    fields: &[
        RealmField::Users,
        RealmField::Groups,
        RealmField::BrowserFlow,
        RealmField::DirectGrantFlow,
        RealmField::ClientAuthenticationFlow,
        RealmField::DockerAuthenticationFlow,
        RealmField::RegistrationFlow,
        RealmField::ResetCredentialsFlow,
        RealmField::Components,
        RealmField::AuthenticationFlows,
    ],
};

/// Fields withheld from the realm-level update payload. Every collection has
/// its own importer, and the bindings are sent by the flow patch.
pub const UPDATE_MASK: FieldMask = FieldMask {
    name: "update",
    version: 1,
    mode: MaskMode::Exclude,
    fields: &[
        RealmField::Clients,
        RealmField::Roles,
        RealmField::Users,
        RealmField::Groups,
        RealmField::IdentityProviders,
        RealmField::BrowserFlow,
        RealmField::DirectGrantFlow,
        RealmField::ClientAuthenticationFlow,
        RealmField::DockerAuthenticationFlow,
        RealmField::RegistrationFlow,
        RealmField::ResetCredentialsFlow,
        RealmField::Components,
        RealmField::AuthenticationFlows,
        RealmField::AuthenticatorConfig,
        RealmField::RequiredActions,
        RealmField::ClientScopes,
        RealmField::ScopeMappings,
    ],
};

/// The only fields the second, flow-binding update may change.
pub const FLOW_PATCH_MASK: FieldMask = FieldMask {
    name: "flow-patch",
    version: 1,
    mode: MaskMode::Include,
    fields: RealmField::FLOW_BINDINGS,
};

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Build a payload from `desired` restricted by `mask`.
///
/// Custom-import options never reach a payload.
pub fn project(desired: &DesiredState, mask: &FieldMask) -> RealmRepresentation {
    let source = &desired.representation;
    match mask.mode {
        MaskMode::Exclude => {
            let mut payload = source.clone();
            for field in mask.fields() {
                field.clear(&mut payload);
            }
            payload
        }
        MaskMode::Include => {
            let mut payload = RealmRepresentation::new(source.realm.clone());
            for field in mask.fields() {
                field.copy(source, &mut payload);
            }
            payload
        }
    }
}

/// Copy the fields `mask` selects from `desired` onto a clone of `base`.
///
/// Fields the desired state leaves unset keep their value from `base`.
pub fn overlay(
    base: &RealmRepresentation,
    desired: &DesiredState,
    mask: &FieldMask,
) -> RealmRepresentation {
    let mut payload = base.clone();
    for field in RealmField::ALL {
        if mask.selects(*field) {
            field.copy(&desired.representation, &mut payload);
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmsync_core::types::{ClientRepresentation, UserRepresentation};
    use serde_json::Value;

    fn desired() -> DesiredState {
        let mut rep = RealmRepresentation::new("acme");
        rep.display_name = Some("Acme".into());
        rep.browser_flow = Some("custom-browser".into());
        rep.clients = Some(vec![ClientRepresentation {
            client_id: "c1".into(),
            settings: Default::default(),
        }]);
        rep.users = Some(vec![UserRepresentation {
            username: "jane".into(),
            settings: Default::default(),
        }]);
        DesiredState::new(rep)
    }

    fn keys(rep: &RealmRepresentation) -> Vec<String> {
        match serde_json::to_value(rep).unwrap() {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn update_mask_is_superset_of_creation_mask() {
        for field in CREATION_MASK.fields() {
            assert!(
                UPDATE_MASK.contains(*field),
                "{} missing from update mask",
                field.wire_name()
            );
        }
    }

    #[test]
    fn flow_patch_mask_is_exactly_the_bindings() {
        assert_eq!(FLOW_PATCH_MASK.fields(), RealmField::FLOW_BINDINGS);
        assert!(FLOW_PATCH_MASK.wire_names().contains(&"browserFlow"));
        assert!(RealmField::ALL
            .iter()
            .filter(|f| f.is_flow_binding())
            .all(|f| FLOW_PATCH_MASK.contains(*f)));
    }

    #[test]
    fn creation_payload_omits_masked_fields() {
        let payload = project(&desired(), &CREATION_MASK);
        let keys = keys(&payload);
        for name in CREATION_MASK.wire_names() {
            assert!(!keys.iter().any(|k| k == name), "{name} leaked into payload");
        }
        assert!(payload.clients.is_some(), "clients travel with the realm create");
        assert_eq!(payload.display_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn update_payload_keeps_only_realm_level_fields() {
        let mut state = desired();
        state.custom_import = Some(Default::default());
        let payload = project(&state, &UPDATE_MASK);
        assert_eq!(keys(&payload), vec!["displayName", "realm"]);
    }

    #[test]
    fn include_projection_keeps_realm_name() {
        let payload = project(&desired(), &FLOW_PATCH_MASK);
        assert_eq!(keys(&payload), vec!["browserFlow", "realm"]);
    }

    #[test]
    fn overlay_changes_only_selected_fields() {
        let mut base = RealmRepresentation::new("acme");
        base.display_name = Some("Remote".into());
        base.browser_flow = Some("browser".into());
        base.direct_grant_flow = Some("direct grant".into());

        let original = desired();
        let patched = overlay(&base, &original, &FLOW_PATCH_MASK);
        assert_eq!(patched.browser_flow.as_deref(), Some("custom-browser"));
        assert_eq!(patched.direct_grant_flow.as_deref(), Some("direct grant"));
        assert_eq!(patched.display_name.as_deref(), Some("Remote"));
        assert!(patched.clients.is_none());
        assert_eq!(original, desired(), "input must not be mutated");
    }

    #[test]
    fn projection_is_deterministic() {
        assert_eq!(
            project(&desired(), &UPDATE_MASK),
            project(&desired(), &UPDATE_MASK)
        );
    }
}
