//! realmsync: declarative Keycloak realm imports.
//!
//! # Usage
//!
//! ```text
//! realmsync import <files-or-dirs>... [--force] [--dry-run] [--prune] [--parallel]
//! realmsync status <files-or-dirs>... [--json]
//! realmsync diff <file>
//! realmsync fingerprint <files-or-dirs>... [--json]
//! realmsync config init [--force]
//! realmsync config show
//! ```
//!
//! Connection flags (`--url`, `--user`, `--password`, `--login-realm`) may
//! also come from `REALMSYNC_*` environment variables and override
//! `~/.realmsync/config.yaml`.

mod admin_client;
mod commands;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, diff::DiffArgs, fingerprint::FingerprintArgs, import::ImportArgs,
    status::StatusArgs, GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "realmsync",
    version,
    about = "Reconcile Keycloak realms with declarative documents",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import desired-state documents into their realms.
    Import(ImportArgs),

    /// Show whether each document differs from its last recorded import.
    Status(StatusArgs),

    /// Show a unified diff of the realm-level fields an import would change.
    Diff(DiffArgs),

    /// Print the fingerprint of each document without contacting the server.
    Fingerprint(FingerprintArgs),

    /// Manage ~/.realmsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.global.verbose, cli.global.log_json);
    match cli.command {
        Commands::Import(args) => args.run(&cli.global),
        Commands::Status(args) => args.run(&cli.global),
        Commands::Diff(args) => args.run(&cli.global),
        Commands::Fingerprint(args) => args.run(),
        Commands::Config { command } => commands::config::run(command, &cli.global),
    }
}
