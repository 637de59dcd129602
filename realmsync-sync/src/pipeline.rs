//! Multi-document entrypoint used by the CLI.
//!
//! Documents for the same target are applied in the order given. [`run`]
//! processes everything sequentially and stops at the first failure;
//! [`run_parallel`] gives each target its own thread and stops only that
//! target's documents on failure.

use std::collections::BTreeMap;
use std::thread;

use realmsync_core::{LoadedState, TargetName};

use crate::error::PipelineError;
use crate::orchestrator::{Orchestrator, ReconcileOutcome};

fn reconcile_one(
    orchestrator: &Orchestrator,
    state: &LoadedState,
) -> Result<ReconcileOutcome, PipelineError> {
    tracing::debug!("importing {}", state.source.display());
    orchestrator
        .reconcile(&state.desired)
        .map_err(|source| PipelineError {
            path: state.source.clone(),
            source,
        })
}

/// Reconcile every document in order, failing fast.
pub fn run(
    orchestrator: &Orchestrator,
    states: &[LoadedState],
) -> Result<Vec<ReconcileOutcome>, PipelineError> {
    states
        .iter()
        .map(|state| reconcile_one(orchestrator, state))
        .collect()
}

/// Per-target result of [`run_parallel`].
pub type TargetResult = (TargetName, Result<Vec<ReconcileOutcome>, PipelineError>);

/// Reconcile distinct targets concurrently, one thread per target.
///
/// Results are returned in target-name order.
pub fn run_parallel(orchestrator: &Orchestrator, states: &[LoadedState]) -> Vec<TargetResult> {
    let mut by_target: BTreeMap<TargetName, Vec<&LoadedState>> = BTreeMap::new();
    for state in states {
        by_target
            .entry(state.desired.target().clone())
            .or_default()
            .push(state);
    }

    thread::scope(|scope| {
        let handles: Vec<_> = by_target
            .into_iter()
            .map(|(target, docs)| {
                let handle = scope.spawn(move || {
                    docs.into_iter()
                        .map(|state| reconcile_one(orchestrator, state))
                        .collect::<Result<Vec<_>, _>>()
                });
                (target, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(target, handle)| {
                let result = match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                (target, result)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use realmsync_core::{DesiredState, RealmRepresentation};
    use tempfile::TempDir;

    use super::*;
    use crate::fingerprint::FileFingerprintStore;
    use crate::lock::InProcessLock;
    use crate::orchestrator::ReconcileAction;
    use crate::remote::InMemoryRemote;

    fn state(realm: &str, file: &str) -> LoadedState {
        LoadedState {
            source: PathBuf::from(file),
            desired: DesiredState::new(RealmRepresentation::new(realm)),
        }
    }

    fn orchestrator(home: &TempDir) -> (Arc<InMemoryRemote>, Orchestrator) {
        let remote = Arc::new(InMemoryRemote::new());
        let orch = Orchestrator::new(
            remote.clone(),
            Box::new(FileFingerprintStore::new(home.path())),
            Arc::new(InProcessLock::new()),
        );
        (remote, orch)
    }

    #[test]
    fn run_empty_returns_empty_vec() {
        let home = TempDir::new().expect("home");
        let (_, orch) = orchestrator(&home);
        assert!(run(&orch, &[]).expect("run").is_empty());
    }

    #[test]
    fn run_stops_at_first_failure_and_names_the_file() {
        let home = TempDir::new().expect("home");
        let (remote, orch) = orchestrator(&home);
        remote.reject(realmsync_core::ResourceKind::Realm, "bad", "invalid realm");

        let err = run(
            &orch,
            &[state("acme", "acme.yaml"), state("bad", "bad.yaml"), state("zeta", "zeta.yaml")],
        )
        .unwrap_err();
        assert_eq!(err.path, PathBuf::from("bad.yaml"));
        assert!(remote.realm(&TargetName::from("acme")).is_some());
        assert!(remote.realm(&TargetName::from("zeta")).is_none());
    }

    #[test]
    fn parallel_run_isolates_targets() {
        let home = TempDir::new().expect("home");
        let (remote, orch) = orchestrator(&home);
        remote.reject(realmsync_core::ResourceKind::Realm, "bad", "invalid realm");

        let results = run_parallel(
            &orch,
            &[state("acme", "a.yaml"), state("bad", "b.yaml"), state("zeta", "z.yaml")],
        );
        let names: Vec<_> = results.iter().map(|(t, _)| t.as_str().to_string()).collect();
        assert_eq!(names, vec!["acme", "bad", "zeta"]);
        assert!(results[1].1.is_err());
        for idx in [0, 2] {
            let outcomes = results[idx].1.as_ref().expect("ok");
            assert_eq!(outcomes[0].action, ReconcileAction::Created);
        }
    }
}
