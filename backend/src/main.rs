// OKR planner - personal goal tracking server
// Entry point and CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use okr_planner::app;
use okr_planner::config::ServerConfig;
use okr_planner::services::ImportService;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "okr-planner", version, about = "Personal OKR planner server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the daily digest scheduler
    Serve,
    /// Load a legacy data.json document into the configured store
    Import {
        /// Path to the legacy document
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "okr_planner=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!("Starting OKR planner {}", env!("CARGO_PKG_VERSION"));
            let app = app::setup(config).await.context("startup failed")?;
            app.run().await?;
        }
        Command::Import { path } => {
            let store = app::open_store(&config).await?;
            let report = ImportService::new(store)
                .import_file(&path)
                .await
                .with_context(|| format!("failed to import {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
