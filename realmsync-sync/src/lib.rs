//! # realmsync-sync
//!
//! Fingerprint-gated realm reconciliation.
//!
//! Build an [`Orchestrator`] from a [`RemoteApi`], a [`FingerprintStore`] and
//! a [`TargetLock`], then call [`Orchestrator::reconcile`] for one desired
//! state or [`pipeline::run`] for a batch of loaded documents.

pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod importers;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod projector;
pub mod remote;
pub mod status;

pub use error::{
    FingerprintError, ImportError, LockError, PipelineError, ReconcileError, RemoteError,
};
pub use fingerprint::{
    Fingerprint, FingerprintRecord, FingerprintStore, FileFingerprintStore, RemoteAttributeStore,
};
pub use importers::{DeletionPolicy, ImportSummary, ImporterSet, SubImporter};
pub use lock::{FileLock, InProcessLock, LockGuard, TargetLock};
pub use orchestrator::{
    Orchestrator, ReconcileAction, ReconcileOptions, ReconcileOutcome, Step, CREATE_SEQUENCE,
    UPDATE_SEQUENCE,
};
pub use remote::{InMemoryRemote, RemoteApi, RemoteCall, ResourceRef};
