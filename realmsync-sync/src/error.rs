//! Error types for realmsync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use realmsync_core::{ResourceKind, TargetName};

/// Failure reported by a [`RemoteApi`](crate::remote::RemoteApi) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote system refused the payload (4xx-equivalent). Not retryable.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The addressed object does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Transport or availability failure; the caller may retry later.
    #[error("remote unavailable: {message}")]
    Unavailable { message: String },

    /// The remote answered with something that cannot be interpreted.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable { .. })
    }
}

/// Failure of one sub-resource importer.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{kind} '{name}': {source}")]
    Remote {
        kind: ResourceKind,
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("{kind} '{name}' references missing {missing_kind} '{reference}'")]
    MissingReference {
        kind: ResourceKind,
        name: String,
        missing_kind: ResourceKind,
        reference: String,
    },

    #[error("{kind} '{name}': cannot encode payload: {source}")]
    Encode {
        kind: ResourceKind,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Target lock failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another run holds the target and did not release it within the patience window.
    #[error("target '{target}' is locked by another run (waited {waited:?})")]
    Busy { target: TargetName, waited: Duration },

    #[error("lock file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fingerprint computation and persistence failures.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("fingerprint store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (canonical form or file store).
    #[error("fingerprint JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fingerprint attribute access failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Error surfaced by one reconciliation run. Every variant names the target.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A referenced dependent object (flow, role, client) does not exist.
    #[error("target '{target}': {kind} '{name}' references missing {missing_kind} '{reference}'")]
    NotFoundPrecondition {
        target: TargetName,
        kind: ResourceKind,
        name: String,
        missing_kind: ResourceKind,
        reference: String,
    },

    /// The remote system rejected a create/update payload.
    #[error("target '{target}': {kind} '{name}' rejected (status {status}): {message}")]
    PayloadRejected {
        target: TargetName,
        kind: ResourceKind,
        name: String,
        status: u16,
        message: String,
    },

    /// The target lock could not be acquired; nothing was changed.
    #[error("target '{target}' is locked by another run (waited {waited:?})")]
    LockUnavailable { target: TargetName, waited: Duration },

    /// The run's sequence names a kind with no registered importer.
    #[error("target '{target}': no importer registered for {kind}")]
    MissingImporter {
        target: TargetName,
        kind: ResourceKind,
    },

    /// Any other remote failure, including transient ones.
    #[error("target '{target}': {kind} '{name}': {source}")]
    Remote {
        target: TargetName,
        kind: ResourceKind,
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("target '{target}': cannot encode {kind} '{name}': {source}")]
    Encode {
        target: TargetName,
        kind: ResourceKind,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("target '{target}': {source}")]
    Fingerprint {
        target: TargetName,
        #[source]
        source: FingerprintError,
    },

    #[error("target '{target}': {source}")]
    Lock {
        target: TargetName,
        #[source]
        source: LockError,
    },
}

impl ReconcileError {
    /// Wrap a remote failure on `kind`/`name` with the target it happened in.
    pub fn remote(
        target: &TargetName,
        kind: ResourceKind,
        name: impl Into<String>,
        source: RemoteError,
    ) -> Self {
        let name = name.into();
        match source {
            RemoteError::Rejected { status, message } => ReconcileError::PayloadRejected {
                target: target.clone(),
                kind,
                name,
                status,
                message,
            },
            source => ReconcileError::Remote {
                target: target.clone(),
                kind,
                name,
                source,
            },
        }
    }

    /// Wrap a sub-importer failure with the target it happened in.
    pub fn import(target: &TargetName, err: ImportError) -> Self {
        match err {
            ImportError::Remote { kind, name, source } => Self::remote(target, kind, name, source),
            ImportError::MissingReference {
                kind,
                name,
                missing_kind,
                reference,
            } => ReconcileError::NotFoundPrecondition {
                target: target.clone(),
                kind,
                name,
                missing_kind,
                reference,
            },
            ImportError::Encode { kind, name, source } => ReconcileError::Encode {
                target: target.clone(),
                kind,
                name,
                source,
            },
        }
    }

    pub fn lock(target: &TargetName, err: LockError) -> Self {
        match err {
            LockError::Busy { target, waited } => ReconcileError::LockUnavailable { target, waited },
            source => ReconcileError::Lock {
                target: target.clone(),
                source,
            },
        }
    }
}

/// Failure of a multi-document pipeline run, annotated with the source document.
#[derive(Debug, Error)]
#[error("import of {path} failed: {source}")]
pub struct PipelineError {
    pub path: PathBuf,
    #[source]
    pub source: ReconcileError,
}

/// Convenience constructor for [`FingerprintError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> FingerprintError {
    FingerprintError::Io {
        path: path.into(),
        source,
    }
}
