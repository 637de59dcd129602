//! `realmsync config init|show`: manage `~/.realmsync/config.yaml`.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use realmsync_core::config::{self as settings, Settings};

use super::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a config file with defaults and any connection flags given.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective settings (password redacted).
    Show,
}

pub fn run(command: ConfigCommand, global: &GlobalArgs) -> Result<()> {
    let home = super::home()?;
    match command {
        ConfigCommand::Init { force } => {
            let path = settings::config_path_at(&home);
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            let mut fresh = Settings::default();
            global.apply(&mut fresh);
            let path = settings::save_at(&home, &fresh)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✓ Wrote {}", path.display());
            Ok(())
        }
        ConfigCommand::Show => {
            let mut effective = super::load_settings(&home, global)?;
            if !effective.keycloak.password.is_empty() {
                effective.keycloak.password = "********".to_string();
            }
            print!(
                "{}",
                serde_yaml::to_string(&effective).context("failed to serialize settings")?
            );
            Ok(())
        }
    }
}
