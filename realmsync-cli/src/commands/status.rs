//! `realmsync status`: compare documents with their recorded fingerprints.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use realmsync_core::config::FingerprintBackend;
use realmsync_sync::fingerprint;
use realmsync_sync::status::{check, format_synced_age, FingerprintStatus};

use super::GlobalArgs;

/// Arguments for `realmsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Document files or directories of documents.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Where fingerprints are kept: remote | file.
    #[arg(long, value_name = "STORE")]
    pub fingerprint_store: Option<FingerprintBackend>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let home = super::home()?;
        let mut settings = super::load_settings(&home, global)?;
        if let Some(store) = self.fingerprint_store {
            settings.import.fingerprint_store = store;
        }

        let states = super::load_documents(&self.paths)?;
        let store = super::fingerprint_store(&settings, &home, None)?;

        let mut rows = Vec::with_capacity(states.len());
        for state in &states {
            let status = check(store.as_ref(), &state.desired).with_context(|| {
                format!("status check failed for '{}'", state.desired.target())
            })?;
            let fingerprint = fingerprint::compute(&state.desired)?;
            rows.push(RealmStatus {
                realm: state.desired.target().to_string(),
                source: state.source.display().to_string(),
                fingerprint: fingerprint.to_string(),
                status,
            });
        }

        if self.json {
            return print_json(rows);
        }
        print_table(rows);
        Ok(())
    }
}

#[derive(Debug)]
struct RealmStatus {
    realm: String,
    source: String,
    fingerprint: String,
    status: FingerprintStatus,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    realms: Vec<RealmStatusJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    documents: usize,
    changed: usize,
    never_imported: usize,
}

#[derive(Serialize)]
struct RealmStatusJson {
    realm: String,
    source: String,
    status: &'static str,
    fingerprint: String,
    stored_fingerprint: Option<String>,
    last_import_at: Option<String>,
    last_import_age: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "realm")]
    realm: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last import")]
    last_import: String,
    #[tabled(rename = "document")]
    source: String,
}

fn print_json(rows: Vec<RealmStatus>) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            documents: rows.len(),
            changed: count(&rows, |s| matches!(s, FingerprintStatus::Changed { .. })),
            never_imported: count(&rows, |s| matches!(s, FingerprintStatus::NeverImported)),
        },
        realms: rows
            .into_iter()
            .map(|row| RealmStatusJson {
                status: status_key(&row.status),
                stored_fingerprint: match &row.status {
                    FingerprintStatus::Changed { stored, .. } => Some(stored.to_string()),
                    FingerprintStatus::Current { .. } => Some(row.fingerprint.clone()),
                    FingerprintStatus::NeverImported => None,
                },
                last_import_at: row.status.synced_at().map(|t| t.to_rfc3339()),
                last_import_age: row.status.synced_at().map(format_synced_age),
                realm: row.realm,
                source: row.source,
                fingerprint: row.fingerprint,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<RealmStatus>) {
    if rows.is_empty() {
        println!("No documents found.");
        return;
    }
    let pending = rows
        .iter()
        .filter(|r| !matches!(r.status, FingerprintStatus::Current { .. }))
        .count();

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            realm: row.realm,
            status: status_label(&row.status),
            last_import: row
                .status
                .synced_at()
                .map(|t| format!("{} ago", format_synced_age(t)))
                .unwrap_or_else(|| "never".to_string()),
            source: row.source,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if pending > 0 {
        println!("Run 'realmsync import' to apply {pending} pending document(s).");
    }
}

fn count(rows: &[RealmStatus], pred: impl Fn(&FingerprintStatus) -> bool) -> usize {
    rows.iter().filter(|r| pred(&r.status)).count()
}

fn status_key(status: &FingerprintStatus) -> &'static str {
    match status {
        FingerprintStatus::NeverImported => "never_imported",
        FingerprintStatus::Current { .. } => "current",
        FingerprintStatus::Changed { .. } => "changed",
    }
}

fn status_label(status: &FingerprintStatus) -> String {
    let label = status.label().to_uppercase();
    match status {
        FingerprintStatus::NeverImported => label.bright_black().bold().to_string(),
        FingerprintStatus::Current { .. } => label.green().bold().to_string(),
        FingerprintStatus::Changed { .. } => label.yellow().bold().to_string(),
    }
}
