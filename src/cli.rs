/// # pdf-mirror CLI
///
/// Command parsing and the async entrypoint shared by `main()` and the integration tests.
/// All pipeline logic lives in [`crate::synchronise`]; this module only loads
/// configuration, builds the real HTTP and Drive clients and prints the run summary.
///
/// Subcommands:
/// - `sync`: one mirror pass (what the scheduler invokes)
/// - `login`: interactive consent, caching the token for later unattended runs
/// - `logout`: remove the cached token
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::download::HttpFetcher;
use crate::drive::DriveClient;
use crate::load_config::load_config;
use crate::synchronise::{synchronise, RunOutcome};

/// CLI for pdf-mirror: keep a Drive folder in sync with the PDFs a website links to.
#[derive(Parser)]
#[clap(
    name = "pdf-mirror",
    version,
    about = "Mirror the PDFs linked from a sitemap into a Google Drive folder"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one synchronisation pass
    Sync {
        /// Path to the YAML config file (settings may also come from PDF_MIRROR_* env vars)
        #[clap(long)]
        config: Option<PathBuf>,
        /// Discover and reconcile, but do not download, upload or delete
        #[clap(long)]
        dry_run: bool,
    },
    /// Authorize Drive access interactively and cache the token
    Login {
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Remove the cached token
    Logout {
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main().
/// Configuration errors are returned as `Err`; a fatal run is reported through the outcome.
pub async fn run(cli: Cli) -> Result<RunOutcome> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, dry_run } => {
            let mut config = load_config(config.as_deref())?;
            config.sync.dry_run |= dry_run;

            let fetcher = HttpFetcher::new(config.download.request_timeout)
                .context("Failed to build HTTP client")?;
            let drive = DriveClient::authorized(
                &config.destination.client_secret_path,
                &config.destination.token_cache_path,
                config.destination.interactive_consent,
                config.download.request_timeout,
            )?;

            println!("Synchronise starting...");
            let report = synchronise(&config, &fetcher, &drive).await;
            println!("Synchronise complete.\nReport:");
            println!("{report}");
            match &report.outcome {
                RunOutcome::Fatal { reason } => {
                    tracing::error!(command = "sync", reason = %reason, "Synchronisation failed")
                }
                outcome => tracing::info!(command = "sync", ?outcome, "Synchronisation complete"),
            }
            Ok(report.outcome)
        }
        Commands::Login { config } => {
            let config = load_config(config.as_deref())?;
            let drive = DriveClient::authorized(
                &config.destination.client_secret_path,
                &config.destination.token_cache_path,
                true,
                config.download.request_timeout,
            )?;
            drive.authenticator().login().await.context("Authorization failed")?;
            println!(
                "Token cached at {}",
                config.destination.token_cache_path.display()
            );
            Ok(RunOutcome::Success)
        }
        Commands::Logout { config } => {
            let config = load_config(config.as_deref())?;
            let drive = DriveClient::authorized(
                &config.destination.client_secret_path,
                &config.destination.token_cache_path,
                false,
                config.download.request_timeout,
            )?;
            drive.authenticator().logout().await?;
            println!("Token cache cleared");
            Ok(RunOutcome::Success)
        }
    }
}
