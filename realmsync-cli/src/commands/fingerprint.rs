//! `realmsync fingerprint`: print document fingerprints offline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use realmsync_sync::fingerprint;

/// Arguments for `realmsync fingerprint`.
#[derive(Args, Debug)]
pub struct FingerprintArgs {
    /// Document files or directories of documents.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct FingerprintJson {
    realm: String,
    source: String,
    fingerprint: String,
}

impl FingerprintArgs {
    pub fn run(self) -> Result<()> {
        let states = super::load_documents(&self.paths)?;
        let mut entries = Vec::with_capacity(states.len());
        for state in &states {
            let fp = fingerprint::compute(&state.desired).with_context(|| {
                format!("cannot fingerprint '{}'", state.source.display())
            })?;
            entries.push(FingerprintJson {
                realm: state.desired.target().to_string(),
                source: state.source.display().to_string(),
                fingerprint: fp.to_string(),
            });
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to serialize JSON")?
            );
            return Ok(());
        }
        for entry in entries {
            println!("{}  {}  {}", entry.fingerprint, entry.realm, entry.source);
        }
        Ok(())
    }
}
