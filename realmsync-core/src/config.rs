//! realmsync configuration (`~/.realmsync/config.yaml`).
//!
//! # API pattern
//!
//! Like the rest of the crate, file access has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! A missing file yields [`Settings::default`]; missing keys take their
//! defaults individually.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub keycloak: RemoteSettings,
    pub import: ImportSettings,
}

// ---------------------------------------------------------------------------
// Remote connection
// ---------------------------------------------------------------------------

/// Connection settings for the remote admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub url: String,
    /// Realm the admin user authenticates against.
    pub login_realm: String,
    pub client_id: String,
    pub user: String,
    pub password: String,
    pub ssl_verify: bool,
    pub availability_check: AvailabilityCheck,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            login_realm: "master".to_string(),
            client_id: "admin-cli".to_string(),
            user: "admin".to_string(),
            password: String::new(),
            ssl_verify: true,
            availability_check: AvailabilityCheck::default(),
        }
    }
}

/// Wait for the remote service to answer before importing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityCheck {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl AvailabilityCheck {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for AvailabilityCheck {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 120,
            retry_delay_secs: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Import behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Re-import even when the stored fingerprint matches.
    pub force: bool,
    /// Suffix of the fingerprint attribute, so that several independent
    /// import pipelines can manage the same realm.
    pub cache_key: String,
    /// Delete remote objects that are absent from the desired collections.
    pub prune: bool,
    pub fingerprint_store: FingerprintBackend,
    pub lock: LockSettings,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            force: false,
            cache_key: "default".to_string(),
            prune: false,
            fingerprint_store: FingerprintBackend::default(),
            lock: LockSettings::default(),
        }
    }
}

/// Where fingerprints are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintBackend {
    /// A realm attribute on the target itself.
    #[default]
    Remote,
    /// `~/.realmsync/fingerprints/<target>.json`.
    File,
}

impl fmt::Display for FingerprintBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintBackend::Remote => write!(f, "remote"),
            FingerprintBackend::File => write!(f, "file"),
        }
    }
}

impl FromStr for FingerprintBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "file" => Ok(Self::File),
            other => Err(format!(
                "unknown fingerprint store '{other}'; expected: remote, file"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub backend: LockBackend,
    /// How long to wait for a busy target; zero fails fast.
    pub patience_secs: u64,
}

impl LockSettings {
    pub fn patience(&self) -> Duration {
        Duration::from_secs(self.patience_secs)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            patience_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// Guards concurrent runs inside one process.
    #[default]
    InProcess,
    /// Lock files under `~/.realmsync/locks/`, shared by processes on one host.
    File,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.realmsync`
pub fn realmsync_root(home: &Path) -> PathBuf {
    home.join(".realmsync")
}

/// `<home>/.realmsync/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    realmsync_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.realmsync/config.yaml`, defaulting when absent.
pub fn load_at(home: &Path) -> Result<Settings, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, CoreError> {
    load_at(&home()?)
}

/// Atomically write settings to `<home>/.realmsync/config.yaml`.
///
/// The file holds the admin password, so it is created with mode `0600`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<PathBuf, CoreError> {
    let dir = realmsync_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let path = config_path_at(home);
    let tmp = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
