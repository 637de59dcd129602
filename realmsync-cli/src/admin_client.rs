//! Blocking HTTP client for the Keycloak admin REST API.
//!
//! Authenticates with the password grant against the configured login realm
//! and re-authenticates once when a request comes back `401`. Everything
//! else is a single attempt; retry policy belongs to whoever runs the import.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use realmsync_core::config::RemoteSettings;
use realmsync_core::types::ScopeMappingRepresentation;
use realmsync_core::{RealmRepresentation, ResourceKind, TargetName};
use realmsync_sync::remote::{resource_id, RemoteApi, ResourceRef};
use realmsync_sync::RemoteError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct AdminClient {
    agent: ureq::Agent,
    settings: RemoteSettings,
    token: Mutex<String>,
}

/// Agent honouring `ssl_verify`. Disabling it accepts any certificate and
/// host name for this client only.
fn build_agent(settings: &RemoteSettings) -> Result<ureq::Agent, RemoteError> {
    let mut builder = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT);
    if !settings.ssl_verify {
        tracing::warn!(
            "TLS certificate verification disabled for {}",
            settings.url
        );
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| RemoteError::Unavailable {
                message: format!("cannot set up TLS: {e}"),
            })?;
        builder = builder.tls_connector(Arc::new(connector));
    }
    Ok(builder.build())
}

impl AdminClient {
    /// Wait for the server when the availability check is enabled, then log in.
    pub fn connect(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let agent = build_agent(settings)?;
        let client = Self {
            agent,
            settings: settings.clone(),
            token: Mutex::new(String::new()),
        };
        if settings.availability_check.enabled {
            client.wait_until_available()?;
        }
        client.login()?;
        Ok(client)
    }

    fn base(&self) -> &str {
        self.settings.url.trim_end_matches('/')
    }

    fn token(&self) -> MutexGuard<'_, String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn login(&self) -> Result<(), RemoteError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base(),
            enc(&self.settings.login_realm)
        );
        tracing::debug!("requesting admin token from {}", url);
        let response = self
            .agent
            .post(&url)
            .send_form(&[
                ("grant_type", "password"),
                ("client_id", self.settings.client_id.as_str()),
                ("username", self.settings.user.as_str()),
                ("password", self.settings.password.as_str()),
            ])
            .map_err(map_error)?;
        let body: TokenResponse = response
            .into_json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        *self.token() = body.access_token;
        Ok(())
    }

    fn wait_until_available(&self) -> Result<(), RemoteError> {
        let check = &self.settings.availability_check;
        let url = format!("{}/realms/{}", self.base(), enc(&self.settings.login_realm));
        let deadline = Instant::now() + check.timeout();
        loop {
            match self.agent.get(&url).call() {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() >= deadline => {
                    return Err(RemoteError::Unavailable {
                        message: format!(
                            "{} did not become available within {:?}: {}",
                            self.base(),
                            check.timeout(),
                            e
                        ),
                    })
                }
                Err(e) => {
                    tracing::info!("waiting for {} ({})", self.base(), e);
                    sleep(check.retry_delay());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    /// Issue `method` against `/admin/realms<path>`.
    fn call(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ureq::Response, RemoteError> {
        let url = format!("{}/admin/realms{}", self.base(), path);
        let mut refreshed = false;
        loop {
            let bearer = format!("Bearer {}", self.token());
            let mut request = self.agent.request(method, &url).set("Authorization", &bearer);
            for (key, value) in query {
                request = request.query(key, value);
            }
            let result = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };
            match result {
                Err(ureq::Error::Status(401, _)) if !refreshed => {
                    tracing::debug!("admin token rejected; logging in again");
                    refreshed = true;
                    self.login()?;
                }
                other => return other.map_err(map_error),
            }
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        self.call("GET", path, query, None)?
            .into_json()
            .map_err(|e| RemoteError::Decode(format!("{path}: {e}")))
    }

    fn get_paged(&self, path: &str) -> Result<Vec<Value>, RemoteError> {
        let max = PAGE_SIZE.to_string();
        let mut all = Vec::new();
        loop {
            let first = all.len().to_string();
            let page: Vec<Value> = self.get_json(
                path,
                &[
                    ("first", first.as_str()),
                    ("max", max.as_str()),
                    ("briefRepresentation", "false"),
                ],
            )?;
            let done = page.len() < PAGE_SIZE;
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    fn collection_path(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
    ) -> Result<String, RemoteError> {
        let tail = match kind {
            ResourceKind::Client => "clients".to_string(),
            ResourceKind::RealmRole => "roles".to_string(),
            ResourceKind::ClientRole => {
                let client = parent.ok_or_else(|| RemoteError::Rejected {
                    status: 400,
                    message: "client roles need an owning client".to_string(),
                })?;
                format!("clients/{}/roles", enc(&self.client_uuid(target, client)?))
            }
            ResourceKind::Group => "groups".to_string(),
            ResourceKind::User => "users".to_string(),
            ResourceKind::IdentityProvider => "identity-provider/instances".to_string(),
            ResourceKind::AuthenticationFlow => "authentication/flows".to_string(),
            ResourceKind::AuthenticatorConfig => "authentication/config".to_string(),
            ResourceKind::RequiredAction => "authentication/required-actions".to_string(),
            ResourceKind::Component => "components".to_string(),
            ResourceKind::ClientScope => "client-scopes".to_string(),
            ResourceKind::Realm | ResourceKind::ScopeMapping | ResourceKind::CustomImport => {
                return Err(not_a_collection(kind))
            }
        };
        Ok(format!("{}/{}", realm_path(target), tail))
    }

    fn client_uuid(&self, target: &TargetName, client_id: &str) -> Result<String, RemoteError> {
        let found: Vec<Value> = self.get_json(
            &format!("{}/clients", realm_path(target)),
            &[("clientId", client_id)],
        )?;
        found
            .iter()
            .find(|c| c.get("clientId").and_then(Value::as_str) == Some(client_id))
            .and_then(|c| c.get("id").and_then(Value::as_str))
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("client '{client_id}' in realm '{target}'"),
            })
    }

    fn client_scope_id(&self, target: &TargetName, name: &str) -> Result<Option<String>, RemoteError> {
        let scopes: Vec<Value> = self.get_json(&format!("{}/client-scopes", realm_path(target)), &[])?;
        Ok(scopes
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|s| s.get("id").and_then(Value::as_str))
            .map(str::to_owned))
    }

    fn partial_export(&self, target: &TargetName) -> Result<Value, RemoteError> {
        self.call(
            "POST",
            &format!("{}/partial-export", realm_path(target)),
            &[("exportClients", "true"), ("exportGroupsAndRoles", "true")],
            None,
        )?
        .into_json()
        .map_err(|e| RemoteError::Decode(format!("partial export of '{target}': {e}")))
    }

    // -----------------------------------------------------------------------
    // Scope mappings
    // -----------------------------------------------------------------------

    /// `.../scope-mappings/realm` of the scope or client named `owner`.
    fn scope_mapping_path(
        &self,
        target: &TargetName,
        owner: &str,
        is_client: bool,
    ) -> Result<String, RemoteError> {
        if !is_client {
            if let Some(id) = self.client_scope_id(target, owner)? {
                return Ok(format!(
                    "{}/client-scopes/{}/scope-mappings/realm",
                    realm_path(target),
                    enc(&id)
                ));
            }
        }
        let uuid = self.client_uuid(target, owner)?;
        Ok(format!(
            "{}/clients/{}/scope-mappings/realm",
            realm_path(target),
            enc(&uuid)
        ))
    }

    fn add_scope_mapping(&self, target: &TargetName, payload: &Value) -> Result<String, RemoteError> {
        let mapping: ScopeMappingRepresentation = serde_json::from_value(payload.clone())
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let owner = mapping.owner().to_string();
        let path = self.scope_mapping_path(target, &owner, mapping.client_scope.is_none())?;
        let roles = mapping
            .roles
            .iter()
            .map(|name| self.get_json::<Value>(&format!("{}/roles/{}", realm_path(target), enc(name)), &[]))
            .collect::<Result<Vec<_>, _>>()?;
        self.call("POST", &path, &[], Some(&Value::Array(roles)))?;
        Ok(owner)
    }

    fn remove_scope_mapping(&self, target: &TargetName, owner: &str) -> Result<(), RemoteError> {
        let path = self.scope_mapping_path(target, owner, false)?;
        let current: Value = self.get_json(&path, &[])?;
        self.call("DELETE", &path, &[], Some(&current))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Special creations
    // -----------------------------------------------------------------------

    fn register_required_action(
        &self,
        target: &TargetName,
        payload: &Value,
    ) -> Result<String, RemoteError> {
        let alias = string_field(payload, "alias")?;
        let registration = serde_json::json!({
            "providerId": payload.get("providerId").and_then(Value::as_str).unwrap_or(alias.as_str()),
            "name": payload.get("name").and_then(Value::as_str).unwrap_or(alias.as_str()),
        });
        self.call(
            "POST",
            &format!("{}/authentication/register-required-action", realm_path(target)),
            &[],
            Some(&registration),
        )?;
        self.call(
            "PUT",
            &format!(
                "{}/authentication/required-actions/{}",
                realm_path(target),
                enc(&alias)
            ),
            &[],
            Some(payload),
        )?;
        Ok(alias)
    }

    /// Authenticator configs hang off the flow execution that references them.
    fn create_authenticator_config(
        &self,
        target: &TargetName,
        payload: &Value,
    ) -> Result<String, RemoteError> {
        let alias = string_field(payload, "alias")?;
        let export = self.partial_export(target)?;
        let (flow, authenticator) = export
            .get("authenticationFlows")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find_map(|flow| {
                let execution = flow
                    .get("authenticationExecutions")
                    .and_then(Value::as_array)?
                    .iter()
                    .find(|e| {
                        e.get("authenticatorConfig").and_then(Value::as_str) == Some(alias.as_str())
                    })?;
                Some((
                    flow.get("alias").and_then(Value::as_str)?.to_string(),
                    execution.get("authenticator").and_then(Value::as_str)?.to_string(),
                ))
            })
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("flow execution referencing authenticator config '{alias}'"),
            })?;

        let executions: Vec<Value> = self.get_json(
            &format!(
                "{}/authentication/flows/{}/executions",
                realm_path(target),
                enc(&flow)
            ),
            &[],
        )?;
        let execution_id = executions
            .iter()
            .find(|e| e.get("providerId").and_then(Value::as_str) == Some(authenticator.as_str()))
            .and_then(|e| e.get("id").and_then(Value::as_str))
            .ok_or_else(|| RemoteError::NotFound {
                what: format!("execution '{authenticator}' in flow '{flow}'"),
            })?;

        let response = self.call(
            "POST",
            &format!(
                "{}/authentication/executions/{}/config",
                realm_path(target),
                enc(execution_id)
            ),
            &[],
            Some(payload),
        )?;
        Ok(location_id(&response).unwrap_or(alias))
    }
}

// ---------------------------------------------------------------------------
// RemoteApi
// ---------------------------------------------------------------------------

impl RemoteApi for AdminClient {
    fn exists(&self, target: &TargetName) -> Result<bool, RemoteError> {
        match self.call("GET", &realm_path(target), &[], None) {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, realm: &RealmRepresentation) -> Result<ResourceRef, RemoteError> {
        let body = serde_json::to_value(realm).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.call("POST", "", &[], Some(&body))?;
        Ok(ResourceRef {
            kind: ResourceKind::Realm,
            id: realm.realm.to_string(),
        })
    }

    fn update(&self, target: &TargetName, realm: &RealmRepresentation) -> Result<(), RemoteError> {
        let body = serde_json::to_value(realm).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.call("PUT", &realm_path(target), &[], Some(&body))?;
        Ok(())
    }

    fn get(&self, target: &TargetName) -> Result<RealmRepresentation, RemoteError> {
        self.get_json(&realm_path(target), &[])
    }

    fn list(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError> {
        match kind {
            ResourceKind::ScopeMapping | ResourceKind::AuthenticatorConfig => {
                let field = if kind == ResourceKind::ScopeMapping {
                    "scopeMappings"
                } else {
                    "authenticatorConfig"
                };
                let export = self.partial_export(target)?;
                Ok(export
                    .get(field)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default())
            }
            ResourceKind::Client | ResourceKind::Group | ResourceKind::User => {
                self.get_paged(&self.collection_path(target, kind, parent)?)
            }
            kind => self.get_json(&self.collection_path(target, kind, parent)?, &[]),
        }
    }

    fn create_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        payload: &Value,
    ) -> Result<ResourceRef, RemoteError> {
        let id = match kind {
            ResourceKind::ScopeMapping => self.add_scope_mapping(target, payload)?,
            ResourceKind::RequiredAction => self.register_required_action(target, payload)?,
            ResourceKind::AuthenticatorConfig => self.create_authenticator_config(target, payload)?,
            kind => {
                let path = self.collection_path(target, kind, parent)?;
                let response = self.call("POST", &path, &[], Some(payload))?;
                location_id(&response)
                    .or_else(|| resource_id(kind, payload))
                    .ok_or_else(|| {
                        RemoteError::Decode(format!("created {kind} without a resolvable id"))
                    })?
            }
        };
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
        if kind == ResourceKind::ScopeMapping {
            self.add_scope_mapping(target, payload)?;
            return Ok(());
        }
        let path = format!("{}/{}", self.collection_path(target, kind, parent)?, enc(id));
        self.call("PUT", &path, &[], Some(payload))?;
        Ok(())
    }

    fn delete_resource(
        &self,
        target: &TargetName,
        kind: ResourceKind,
        parent: Option<&str>,
        id: &str,
    ) -> Result<(), RemoteError> {
        if kind == ResourceKind::ScopeMapping {
            return self.remove_scope_mapping(target, id);
        }
        let path = format!("{}/{}", self.collection_path(target, kind, parent)?, enc(id));
        self.call("DELETE", &path, &[], None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn enc(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn realm_path(target: &TargetName) -> String {
    format!("/{}", enc(target.as_str()))
}

fn not_a_collection(kind: ResourceKind) -> RemoteError {
    RemoteError::Rejected {
        status: 400,
        message: format!("{kind} is not addressable as a collection"),
    }
}

fn string_field(payload: &Value, field: &str) -> Result<String, RemoteError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RemoteError::Decode(format!("payload has no '{field}'")))
}

/// Last path segment of the `Location` header of a `201 Created`.
fn location_id(response: &ureq::Response) -> Option<String> {
    let location = response.header("Location")?;
    let last = location.trim_end_matches('/').rsplit('/').next()?;
    urlencoding::decode(last).ok().map(|s| s.into_owned())
}

fn map_error(error: ureq::Error) -> RemoteError {
    match error {
        ureq::Error::Status(404, response) => RemoteError::NotFound {
            what: response.get_url().to_string(),
        },
        ureq::Error::Status(status, response) if (400..500).contains(&status) => {
            RemoteError::Rejected {
                status,
                message: error_message(response),
            }
        }
        ureq::Error::Status(status, response) => RemoteError::Unavailable {
            message: format!("status {status}: {}", error_message(response)),
        },
        ureq::Error::Transport(transport) => RemoteError::Unavailable {
            message: transport.to_string(),
        },
    }
}

/// The server's error text, preferring the JSON error fields when present.
fn error_message(response: ureq::Response) -> String {
    let text = response.into_string().unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => ["errorMessage", "error_description", "error"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or(text),
        Err(_) => text,
    }
}
