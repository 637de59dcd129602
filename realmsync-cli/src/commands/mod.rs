//! Subcommands and the plumbing they share: settings resolution, connecting
//! to the server, and wiring fingerprint stores and locks from settings.

pub mod config;
pub mod diff;
pub mod fingerprint;
pub mod import;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use realmsync_core::config::{self as settings, FingerprintBackend, LockBackend, Settings};
use realmsync_core::{loader, LoadedState};
use realmsync_sync::{
    FileFingerprintStore, FileLock, FingerprintStore, InProcessLock, RemoteApi,
    RemoteAttributeStore, TargetLock,
};

use crate::admin_client::AdminClient;

// ---------------------------------------------------------------------------
// Global flags
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Server base URL, e.g. https://idp.example.com
    #[arg(long, env = "REALMSYNC_URL", global = true)]
    pub url: Option<String>,

    /// Admin user name.
    #[arg(long, env = "REALMSYNC_USER", global = true)]
    pub user: Option<String>,

    /// Admin password.
    #[arg(long, env = "REALMSYNC_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Realm the admin user logs in to.
    #[arg(long, env = "REALMSYNC_LOGIN_REALM", global = true)]
    pub login_realm: Option<String>,
}

impl GlobalArgs {
    /// Apply connection overrides on top of file settings.
    pub fn apply(&self, settings: &mut Settings) {
        let remote = &mut settings.keycloak;
        if let Some(url) = &self.url {
            remote.url = url.clone();
        }
        if let Some(user) = &self.user {
            remote.user = user.clone();
        }
        if let Some(password) = &self.password {
            remote.password = password.clone();
        }
        if let Some(realm) = &self.login_realm {
            remote.login_realm = realm.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `~/.realmsync/config.yaml` with command-line overrides applied.
pub fn load_settings(home: &Path, global: &GlobalArgs) -> Result<Settings> {
    let mut settings = settings::load_at(home).with_context(|| {
        format!(
            "failed to load {}",
            settings::config_path_at(home).display()
        )
    })?;
    global.apply(&mut settings);
    Ok(settings)
}

pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<LoadedState>> {
    loader::load_paths(paths).context("failed to load desired-state documents")
}

pub fn connect(settings: &Settings) -> Result<Arc<dyn RemoteApi>> {
    let client = AdminClient::connect(&settings.keycloak)
        .with_context(|| format!("cannot connect to {}", settings.keycloak.url))?;
    tracing::debug!("connected to {}", settings.keycloak.url);
    Ok(Arc::new(client))
}

/// The fingerprint store selected in settings.
///
/// The remote store needs a connection; the file store works offline.
pub fn fingerprint_store(
    settings: &Settings,
    home: &Path,
    remote: Option<Arc<dyn RemoteApi>>,
) -> Result<Box<dyn FingerprintStore>> {
    match settings.import.fingerprint_store {
        FingerprintBackend::File => Ok(Box::new(FileFingerprintStore::new(home))),
        FingerprintBackend::Remote => {
            let remote = match remote {
                Some(remote) => remote,
                None => connect(settings)?,
            };
            Ok(Box::new(RemoteAttributeStore::new(
                remote,
                settings.import.cache_key.clone(),
            )))
        }
    }
}

pub fn target_lock(settings: &Settings, home: &Path) -> Arc<dyn TargetLock> {
    match settings.import.lock.backend {
        LockBackend::InProcess => Arc::new(InProcessLock::new()),
        LockBackend::File => Arc::new(FileLock::new(home)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut settings = Settings::default();
        let global = GlobalArgs {
            url: Some("https://idp.example.com".to_string()),
            password: Some("s3cret".to_string()),
            ..GlobalArgs::default()
        };
        global.apply(&mut settings);
        assert_eq!(settings.keycloak.url, "https://idp.example.com");
        assert_eq!(settings.keycloak.password, "s3cret");
        assert_eq!(settings.keycloak.user, "admin");
        assert_eq!(settings.keycloak.login_realm, "master");
    }

    #[test]
    fn file_store_needs_no_connection() {
        let home = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.import.fingerprint_store = FingerprintBackend::File;
        settings.keycloak.url = "http://127.0.0.1:1".to_string();
        assert!(fingerprint_store(&settings, home.path(), None).is_ok());
    }
}
