//! `realmsync diff <file>`: show what an import would change at realm level.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use realmsync_core::loader;
use realmsync_sync::diff::diff_realm;

use super::GlobalArgs;

/// Arguments for `realmsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Desired-state document to compare with the server.
    pub path: PathBuf,
}

impl DiffArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let home = super::home()?;
        let settings = super::load_settings(&home, global)?;
        let state = loader::load_file(&self.path)
            .with_context(|| format!("failed to load '{}'", self.path.display()))?;
        let remote = super::connect(&settings)?;

        let target = state.desired.target();
        let diff = diff_realm(remote.as_ref(), &state.desired)
            .with_context(|| format!("diff failed for '{target}'"))?;

        if !diff.exists {
            println!("Realm '{target}' does not exist yet; an import would create it.");
        }
        if diff.is_empty() {
            println!("No differences for '{target}'.");
            return Ok(());
        }
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
