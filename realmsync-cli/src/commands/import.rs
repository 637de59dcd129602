//! `realmsync import`: reconcile realms with desired-state documents.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use realmsync_core::config::FingerprintBackend;
use realmsync_sync::{
    pipeline, DeletionPolicy, ImporterSet, Orchestrator, ReconcileAction, ReconcileOptions,
    ReconcileOutcome,
};

use super::GlobalArgs;

/// Arguments for `realmsync import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Document files or directories of documents, imported in the order given.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Import even when a document matches its recorded fingerprint.
    #[arg(long)]
    pub force: bool,

    /// Report what would be imported without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Delete remote objects missing from the declared collections.
    #[arg(long)]
    pub prune: bool,

    /// Where fingerprints are kept: remote | file.
    #[arg(long, value_name = "STORE")]
    pub fingerprint_store: Option<FingerprintBackend>,

    /// Seconds to wait for a realm another run is importing (0 fails fast).
    #[arg(long, value_name = "SECS")]
    pub lock_patience: Option<u64>,

    /// Import distinct realms concurrently.
    #[arg(long)]
    pub parallel: bool,
}

impl ImportArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let home = super::home()?;
        let mut settings = super::load_settings(&home, global)?;
        if let Some(store) = self.fingerprint_store {
            settings.import.fingerprint_store = store;
        }
        if let Some(secs) = self.lock_patience {
            settings.import.lock.patience_secs = secs;
        }
        settings.import.force |= self.force;
        settings.import.prune |= self.prune;

        let states = super::load_documents(&self.paths)?;
        if states.is_empty() {
            println!("No documents found.");
            return Ok(());
        }

        let remote = super::connect(&settings)?;
        let fingerprints = super::fingerprint_store(&settings, &home, Some(remote.clone()))?;
        let lock = super::target_lock(&settings, &home);
        let policy = if settings.import.prune {
            DeletionPolicy::Prune
        } else {
            DeletionPolicy::Keep
        };
        let orchestrator = Orchestrator::new(remote, fingerprints, lock)
            .with_importers(ImporterSet::standard(policy))
            .with_options(ReconcileOptions {
                force: settings.import.force,
                dry_run: self.dry_run,
                lock_patience: settings.import.lock.patience(),
            });

        if !self.parallel {
            let outcomes = pipeline::run(&orchestrator, &states).context("import failed")?;
            for outcome in &outcomes {
                print_outcome(outcome);
            }
            return Ok(());
        }

        let mut failed = 0;
        for (target, result) in pipeline::run_parallel(&orchestrator, &states) {
            match result {
                Ok(outcomes) => outcomes.iter().for_each(print_outcome),
                Err(e) => {
                    failed += 1;
                    eprintln!("{} '{}': {:#}", "✗".red().bold(), target, anyhow::Error::new(e));
                }
            }
        }
        if failed > 0 {
            bail!("import failed for {failed} realm(s)");
        }
        Ok(())
    }
}

fn print_outcome(outcome: &ReconcileOutcome) {
    let target = &outcome.target;
    match outcome.action {
        ReconcileAction::Skipped => {
            println!("{} '{}' unchanged", "·".bright_black(), target);
        }
        ReconcileAction::WouldCreate | ReconcileAction::WouldUpdate => {
            println!("[dry-run] ~ '{}' {}", target, outcome.action);
        }
        ReconcileAction::Created | ReconcileAction::Updated => {
            println!(
                "{} '{}' {} ({})",
                "✓".green().bold(),
                target,
                outcome.action,
                outcome.total()
            );
            for (kind, summary) in &outcome.imports {
                if summary.changes() > 0 {
                    println!("  ✎  {kind}: {summary}");
                }
            }
        }
    }
}
