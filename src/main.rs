//! # Report Agent CLI (`report-agent`)
//!
//! ## Usage
//!
//! ```bash
//! report-agent --config ./config/report-agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `report-agent init` | Create the storage and upload directories |
//! | `report-agent serve` | Start the HTTP API |
//! | `report-agent ingest <user> <file>` | OCR, segment and index a PDF report |
//! | `report-agent query <user> "<text>"` | Ask a question about an indexed report |
//! | `report-agent delete <user>` | Remove one user's index |
//! | `report-agent wipe --yes` | Remove every index |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `report_agent=info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use report_agent::config::{self, Config};
use report_agent::embedding::DisabledProvider;
use report_agent::index::IndexManager;
use report_agent::models::UserIdentity;
use report_agent::server;
use report_agent::service::{QueryStatus, ReportService};

/// Report Agent: index a scanned health report and ask questions about it.
#[derive(Parser)]
#[command(name = "report-agent", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/report-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage root and upload directory. Idempotent.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Index a PDF as the report of a user, replacing any previous one.
    Ingest {
        user: String,
        file: PathBuf,
    },

    /// Answer a question from a user's indexed report.
    Query {
        user: String,
        text: String,
    },

    /// Delete a user's index.
    Delete {
        user: String,
    },

    /// Delete every index under the storage root.
    Wipe {
        /// Required; there is no undo.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("report_agent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            storage_only(&cfg).ensure_storage_root().await?;
            tokio::fs::create_dir_all(&cfg.storage.uploads)
                .await
                .with_context(|| format!("creating {}", cfg.storage.uploads.display()))?;
            println!("Storage ready at {}", cfg.storage.root.display());
        }
        Commands::Serve => {
            let service = Arc::new(ReportService::from_config(&cfg)?);
            service.ensure_storage_root().await?;
            server::run_server(
                service,
                &cfg.server.bind,
                cfg.server.max_upload_mb * 1024 * 1024,
            )
            .await?;
        }
        Commands::Ingest { user, file } => {
            let identity = UserIdentity::parse(user)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let service = ReportService::from_config(&cfg)?;
            service.ensure_storage_root().await?;
            let summary = service.create_index(&identity, &bytes).await?;
            println!(
                "Indexed {} pages into {} chunks for {} ({}, {} dims)",
                summary.pages, summary.chunks, summary.identity, summary.model, summary.dims
            );
        }
        Commands::Query { user, text } => {
            let identity = UserIdentity::parse(user)?;
            let service = ReportService::from_config(&cfg)?;
            service.ensure_storage_root().await?;

            let response = service.answer_query(&identity, &text).await;
            println!("{}", response.answer);
            if response.status != QueryStatus::Ok {
                bail!("query finished with status {}", response.status.as_str());
            }
        }
        Commands::Delete { user } => {
            let identity = UserIdentity::parse(user)?;
            if storage_only(&cfg).delete(&identity).await? {
                println!("Deleted index for {}", identity);
            } else {
                println!("No index for {}, nothing to delete", identity);
            }
        }
        Commands::Wipe { yes } => {
            if !yes {
                bail!("refusing to delete every index without --yes");
            }
            storage_only(&cfg).wipe_all().await?;
            println!("Cleared {}", cfg.storage.root.display());
        }
    }

    Ok(())
}

/// Index manager for commands that never embed anything.
fn storage_only(cfg: &Config) -> IndexManager {
    IndexManager::new(
        cfg.storage.root.clone(),
        Arc::new(DisabledProvider),
        cfg.embedding.batch_size,
    )
}
