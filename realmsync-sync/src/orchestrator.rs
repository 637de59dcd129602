//! Reconciliation orchestrator.
//!
//! ## `reconcile` protocol
//!
//! 1. Acquire the target lock (released by the guard on every exit path).
//! 2. Compute the desired-state fingerprint.
//! 3. Ask the remote whether the target exists.
//! 4. Absent: create it from the creation projection, then run
//!    [`CREATE_SEQUENCE`].
//! 5. Present: compare with the stored fingerprint; skip when identical
//!    (unless forced), otherwise update from the update projection and run
//!    [`UPDATE_SEQUENCE`].
//!
//! Both sequences contain the flow patch, a second realm update that binds
//! the authentication flows once they exist, and end by recording the
//! fingerprint. A run stops at the first failing step; nothing is rolled back
//! and the fingerprint is not recorded, so the next run retries in full. A
//! sequence naming a kind with no registered importer fails before the first
//! remote change.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use realmsync_core::{DesiredState, ResourceKind, TargetName};
use serde_json::Value;

use crate::error::{ReconcileError, RemoteError};
use crate::fingerprint::{self, Fingerprint, FingerprintRecord, FingerprintStore};
use crate::importers::{ImportSummary, ImporterSet};
use crate::lock::{LockGuard, TargetLock};
use crate::projector::{self, RealmField, CREATION_MASK, FLOW_PATCH_MASK, UPDATE_MASK};
use crate::remote::RemoteApi;

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// One step of a create or update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Import(ResourceKind),
    /// Second realm update carrying only the flow bindings.
    FlowPatch,
    RecordFingerprint,
}

/// Steps after the realm itself was created. Clients, roles, identity
/// providers and the remaining collections travel with the create payload.
pub const CREATE_SEQUENCE: &[Step] = &[
    // Before groups, which may list users as members.
    Step::Import(ResourceKind::User),
    // Needs the roles created with the realm.
    Step::Import(ResourceKind::Group),
    // Must exist before any binding names them.
    Step::Import(ResourceKind::AuthenticationFlow),
    // Binds the flows imported above.
    Step::FlowPatch,
    // May reference bound flows.
    Step::Import(ResourceKind::Component),
    // Edits built-in roles, which exist once the realm does.
    Step::Import(ResourceKind::CustomImport),
    // Last: only a complete run is recorded.
    Step::RecordFingerprint,
];

/// Steps after the realm-level update of an existing target.
pub const UPDATE_SEQUENCE: &[Step] = &[
    // Client roles and scope mappings are addressed through clients.
    Step::Import(ResourceKind::Client),
    // Groups and users carry role mappings.
    Step::Import(ResourceKind::RealmRole),
    // Before users, which may list groups.
    Step::Import(ResourceKind::Group),
    // Before scope mappings, which target scopes.
    Step::Import(ResourceKind::ClientScope),
    // Needs groups and roles.
    Step::Import(ResourceKind::User),
    // Flow executions may require actions.
    Step::Import(ResourceKind::RequiredAction),
    // Must exist before any binding names them.
    Step::Import(ResourceKind::AuthenticationFlow),
    // Configs are attached to executions of the flows above.
    Step::Import(ResourceKind::AuthenticatorConfig),
    // Binds the flows imported above.
    Step::FlowPatch,
    // May reference bound flows.
    Step::Import(ResourceKind::Component),
    // Needs clients, scopes and realm roles.
    Step::Import(ResourceKind::ScopeMapping),
    // Mappers may reference flows (first/post broker login).
    Step::Import(ResourceKind::IdentityProvider),
    // Edits built-in roles.
    Step::Import(ResourceKind::CustomImport),
    // Last: only a complete run is recorded.
    Step::RecordFingerprint,
];

/// Progress of one run. Steps may only move it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Updated,
    FlowsResolved,
    Recorded,
}

impl Phase {
    fn after(self, step: Step) -> Phase {
        match (self, step) {
            (Phase::Created | Phase::Updated, Step::FlowPatch) => Phase::FlowsResolved,
            (Phase::FlowsResolved, Step::RecordFingerprint) => Phase::Recorded,
            (phase, Step::Import(_)) => phase,
            (phase, step) => {
                tracing::warn!("step {:?} out of order in phase {:?}", step, phase);
                phase
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Import even when the stored fingerprint matches.
    pub force: bool,
    /// Decide what would happen without changing anything remotely.
    pub dry_run: bool,
    /// How long to wait for a target held by another run.
    pub lock_patience: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            lock_patience: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
    /// The stored fingerprint matched; no change was sent.
    Skipped,
    WouldCreate,
    WouldUpdate,
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Updated => "updated",
            ReconcileAction::Skipped => "unchanged",
            ReconcileAction::WouldCreate => "would create",
            ReconcileAction::WouldUpdate => "would update",
        };
        f.write_str(s)
    }
}

/// Result of one successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub target: TargetName,
    pub action: ReconcileAction,
    pub fingerprint: Fingerprint,
    /// Per-importer summaries, in the order the steps ran.
    pub imports: Vec<(ResourceKind, ImportSummary)>,
}

impl ReconcileOutcome {
    pub fn total(&self) -> ImportSummary {
        let mut total = ImportSummary::default();
        for (_, summary) in &self.imports {
            total += *summary;
        }
        total
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives runs for any number of targets against one remote system.
///
/// Runs for distinct targets may proceed concurrently on one orchestrator;
/// runs for the same target are serialized by the lock.
pub struct Orchestrator {
    remote: Arc<dyn RemoteApi>,
    importers: ImporterSet,
    fingerprints: Box<dyn FingerprintStore>,
    lock: Arc<dyn TargetLock>,
    options: ReconcileOptions,
}

impl Orchestrator {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        fingerprints: Box<dyn FingerprintStore>,
        lock: Arc<dyn TargetLock>,
    ) -> Self {
        Self {
            remote,
            importers: ImporterSet::default(),
            fingerprints,
            lock,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_importers(mut self, importers: ImporterSet) -> Self {
        self.importers = importers;
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn remote(&self) -> &dyn RemoteApi {
        self.remote.as_ref()
    }

    pub fn fingerprints(&self) -> &dyn FingerprintStore {
        self.fingerprints.as_ref()
    }

    /// Bring the target named by `desired` in line with it.
    pub fn reconcile(&self, desired: &DesiredState) -> Result<ReconcileOutcome, ReconcileError> {
        let target = desired.target().clone();
        let _guard = LockGuard::acquire(
            Arc::clone(&self.lock),
            &target,
            self.options.lock_patience,
        )
        .map_err(|e| ReconcileError::lock(&target, e))?;

        let fingerprint =
            fingerprint::compute(desired).map_err(|source| ReconcileError::Fingerprint {
                target: target.clone(),
                source,
            })?;
        let exists = self
            .remote
            .exists(&target)
            .map_err(|e| ReconcileError::remote(&target, ResourceKind::Realm, target.as_str(), e))?;

        let mut outcome = ReconcileOutcome {
            target: target.clone(),
            action: ReconcileAction::Skipped,
            fingerprint,
            imports: Vec::new(),
        };

        let phase = if !exists {
            if self.options.dry_run {
                tracing::info!("[dry-run] would create realm: {}", target);
                outcome.action = ReconcileAction::WouldCreate;
                return Ok(outcome);
            }
            self.ensure_importers(&target, CREATE_SEQUENCE)?;
            self.create(desired)?;
            outcome.action = ReconcileAction::Created;
            self.execute(Phase::Created, CREATE_SEQUENCE, desired, &mut outcome)?
        } else {
            if !self.options.force && !self.has_changed(&target, &outcome.fingerprint) {
                tracing::info!("unchanged: {} (fingerprint {})", target, outcome.fingerprint);
                return Ok(outcome);
            }
            if self.options.dry_run {
                tracing::info!("[dry-run] would update realm: {}", target);
                outcome.action = ReconcileAction::WouldUpdate;
                return Ok(outcome);
            }
            self.ensure_importers(&target, UPDATE_SEQUENCE)?;
            self.update(desired)?;
            outcome.action = ReconcileAction::Updated;
            self.execute(Phase::Updated, UPDATE_SEQUENCE, desired, &mut outcome)?
        };

        debug_assert_eq!(phase, Phase::Recorded);
        tracing::info!("{} realm: {}", outcome.action, target);
        Ok(outcome)
    }

    fn has_changed(&self, target: &TargetName, fingerprint: &Fingerprint) -> bool {
        match self.fingerprints.read(target) {
            Ok(Some(record)) => record.fingerprint != *fingerprint,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("fingerprint of {} unavailable, importing: {}", target, e);
                true
            }
        }
    }

    /// Refuse to start a sequence whose imports cannot all run.
    fn ensure_importers(&self, target: &TargetName, steps: &[Step]) -> Result<(), ReconcileError> {
        let missing = steps.iter().find_map(|step| match *step {
            Step::Import(kind) if self.importers.get(kind).is_none() => Some(kind),
            _ => None,
        });
        match missing {
            Some(kind) => Err(ReconcileError::MissingImporter {
                target: target.clone(),
                kind,
            }),
            None => Ok(()),
        }
    }

    fn create(&self, desired: &DesiredState) -> Result<(), ReconcileError> {
        let target = desired.target();
        let payload = projector::project(desired, &CREATION_MASK);
        tracing::info!("creating realm: {}", target);
        self.remote
            .create(&payload)
            .map_err(|e| ReconcileError::remote(target, ResourceKind::Realm, target.as_str(), e))?;
        Ok(())
    }

    fn update(&self, desired: &DesiredState) -> Result<(), ReconcileError> {
        let target = desired.target();
        let payload = projector::project(desired, &UPDATE_MASK);
        tracing::info!("updating realm: {}", target);
        self.remote
            .update(target, &payload)
            .map_err(|e| ReconcileError::remote(target, ResourceKind::Realm, target.as_str(), e))
    }

    fn execute(
        &self,
        mut phase: Phase,
        steps: &[Step],
        desired: &DesiredState,
        outcome: &mut ReconcileOutcome,
    ) -> Result<Phase, ReconcileError> {
        let target = desired.target();
        for step in steps {
            match *step {
                Step::Import(kind) => {
                    let importer = self.importers.get(kind).ok_or_else(|| {
                        ReconcileError::MissingImporter {
                            target: target.clone(),
                            kind,
                        }
                    })?;
                    let summary = importer
                        .reconcile(self.remote.as_ref(), desired)
                        .map_err(|e| ReconcileError::import(target, e))?;
                    tracing::debug!("{} {}: {}", target, kind, summary);
                    outcome.imports.push((kind, summary));
                }
                Step::FlowPatch => self.patch_flows(desired)?,
                Step::RecordFingerprint => {
                    let record = FingerprintRecord::new(target.clone(), outcome.fingerprint.clone());
                    self.fingerprints.write(&record).map_err(|source| {
                        ReconcileError::Fingerprint {
                            target: target.clone(),
                            source,
                        }
                    })?;
                }
            }
            phase = phase.after(*step);
        }
        Ok(phase)
    }

    /// Bind the desired flows, changing no other field.
    fn patch_flows(&self, desired: &DesiredState) -> Result<(), ReconcileError> {
        let target = desired.target();
        let bindings: Vec<(RealmField, &str)> = RealmField::FLOW_BINDINGS
            .iter()
            .filter_map(|f| f.flow_alias(&desired.representation).map(|a| (*f, a)))
            .collect();
        if bindings.is_empty() {
            tracing::debug!("no flow bindings declared for {}", target);
            return Ok(());
        }

        let realm_err =
            |e: RemoteError| ReconcileError::remote(target, ResourceKind::Realm, target.as_str(), e);
        let flows = self
            .remote
            .list(target, ResourceKind::AuthenticationFlow, None)
            .map_err(|e| {
                ReconcileError::remote(target, ResourceKind::AuthenticationFlow, target.as_str(), e)
            })?;
        for (field, alias) in &bindings {
            let known = flows
                .iter()
                .any(|f| f.get("alias").and_then(Value::as_str) == Some(*alias));
            if !known {
                return Err(ReconcileError::NotFoundPrecondition {
                    target: target.clone(),
                    kind: ResourceKind::Realm,
                    name: field.wire_name().to_string(),
                    missing_kind: ResourceKind::AuthenticationFlow,
                    reference: alias.to_string(),
                });
            }
        }

        let current = self.remote.get(target).map_err(realm_err)?;
        let payload = projector::overlay(&current, desired, &FLOW_PATCH_MASK);
        tracing::debug!("binding flows of {}: {:?}", target, bindings);
        self.remote.update(target, &payload).map_err(realm_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(start: Phase, steps: &[Step]) -> Phase {
        steps.iter().fold(start, |phase, step| phase.after(*step))
    }

    #[test]
    fn both_sequences_end_recorded() {
        assert_eq!(run(Phase::Created, CREATE_SEQUENCE), Phase::Recorded);
        assert_eq!(run(Phase::Updated, UPDATE_SEQUENCE), Phase::Recorded);
    }

    #[test]
    fn flows_are_imported_before_the_patch() {
        for steps in [CREATE_SEQUENCE, UPDATE_SEQUENCE] {
            let flows = steps
                .iter()
                .position(|s| *s == Step::Import(ResourceKind::AuthenticationFlow))
                .unwrap();
            let patch = steps.iter().position(|s| *s == Step::FlowPatch).unwrap();
            assert!(flows < patch);
            assert_eq!(steps.last(), Some(&Step::RecordFingerprint));
        }
    }

    #[test]
    fn update_sequence_orders_dependencies() {
        let pos = |kind| {
            UPDATE_SEQUENCE
                .iter()
                .position(|s| *s == Step::Import(kind))
                .unwrap()
        };
        assert!(pos(ResourceKind::Client) < pos(ResourceKind::RealmRole));
        assert!(pos(ResourceKind::RealmRole) < pos(ResourceKind::ScopeMapping));
        assert!(pos(ResourceKind::ClientScope) < pos(ResourceKind::ScopeMapping));
        assert!(pos(ResourceKind::Group) < pos(ResourceKind::User));
    }

    #[test]
    fn action_display() {
        assert_eq!(ReconcileAction::Skipped.to_string(), "unchanged");
        assert_eq!(ReconcileAction::WouldCreate.to_string(), "would create");
    }
}
