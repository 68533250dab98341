use anyhow::Result;
use clap::Parser;
use pdf_mirror::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) if outcome.is_fatal() => {
            tracing::error!(?outcome, "CLI exited with fatal run outcome");
            std::process::exit(1);
        }
        Ok(outcome) => {
            tracing::info!(?outcome, "CLI completed successfully");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            Err(e)
        }
    }
}
