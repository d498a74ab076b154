//! Command-line interface and command execution

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::auth;
use crate::client::GmailMailClient;
use crate::config::Config;
use crate::error::Result;
use crate::evaluator::OpenRouterEvaluator;
use crate::labels::LabelCoordinator;
use crate::poller::Poller;
use crate::store::ProcessedStore;

#[derive(Parser)]
#[command(
    name = "internship-triage",
    about = "Automated triage of internship inquiry email",
    version
)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        default_value = ".internship-triage/config.toml"
    )]
    pub config: PathBuf,

    /// Path to the OAuth2 credentials JSON file
    #[arg(long, global = true, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path where OAuth2 tokens are cached
    #[arg(long, global = true, default_value = ".internship-triage/token.json")]
    pub token_cache: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the OAuth2 flow and cache a token
    Auth {
        /// Discard any cached token and re-authenticate
        #[arg(long)]
        force: bool,
    },
    /// Run the continuous poll loop until interrupted
    Run,
    /// Run a single poll cycle and exit
    PollOnce,
    /// Create any missing triage labels and exit
    EnsureLabels,
    /// Summarize processed messages
    Report {
        /// Number of recent records to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Clear the processed-message store, making all messages eligible again
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

/// Everything a polling command needs, built once at startup
struct Pipeline {
    poller: Poller,
}

async fn build_pipeline(cli: &Cli, config: &Config) -> Result<Pipeline> {
    let (hub, credentials) = auth::initialize(&cli.credentials, &cli.token_cache).await?;
    auth::secure_token_file(&cli.token_cache).await?;

    let client = Arc::new(GmailMailClient::new(hub));
    // A missing API key fails here, at startup, not per message
    let evaluator = Arc::new(OpenRouterEvaluator::from_env(config.evaluation.clone())?);
    let store = Arc::new(ProcessedStore::open(config.store.path.as_ref())?);

    let poller = Poller::new(
        client,
        Arc::new(credentials),
        evaluator,
        config.labels.clone(),
        store,
        config.poll.clone(),
    );

    Ok(Pipeline { poller })
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config).await?;

    match cli.command {
        Commands::Auth { force } => {
            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                info!("Removed cached token at {:?}", cli.token_cache);
            }
            let _ = auth::initialize(&cli.credentials, &cli.token_cache).await?;
            auth::secure_token_file(&cli.token_cache).await?;
            println!("Authentication complete, token cached at {:?}", cli.token_cache);
            Ok(())
        }

        Commands::Run => {
            let pipeline = build_pipeline(&cli, &config).await?;
            pipeline.poller.label_coordinator().ensure_labels_exist().await?;

            pipeline.poller.start();
            println!(
                "Polling every {:?}, press Ctrl-C to stop",
                pipeline.poller.status().interval
            );

            tokio::signal::ctrl_c().await?;
            pipeline.poller.stop();
            println!("Stopped");
            Ok(())
        }

        Commands::PollOnce => {
            let pipeline = build_pipeline(&cli, &config).await?;
            pipeline.poller.label_coordinator().ensure_labels_exist().await?;

            let summary = pipeline.poller.run_cycle_once().await;
            println!(
                "Cycle complete: {} processed, {} skipped, {} without keywords, {} errors",
                summary.processed, summary.skipped, summary.no_keywords, summary.errors
            );
            Ok(())
        }

        Commands::EnsureLabels => {
            let (hub, _credentials) = auth::initialize(&cli.credentials, &cli.token_cache).await?;
            let client = Arc::new(GmailMailClient::new(hub));
            let coordinator = LabelCoordinator::new(client, config.labels.clone());
            coordinator.ensure_labels_exist().await?;
            println!("All triage labels present");
            Ok(())
        }

        Commands::Report { limit } => {
            let store = ProcessedStore::open(config.store.path.as_ref())?;
            print_report(&store, limit)?;
            Ok(())
        }

        Commands::Reset { yes } => {
            if !yes {
                println!("This deletes every processed-message record; re-run with --yes to confirm");
                return Ok(());
            }
            let store = ProcessedStore::open(config.store.path.as_ref())?;
            let deleted = store.reset()?;
            println!("Deleted {} records", deleted);
            Ok(())
        }
    }
}

fn print_report(store: &ProcessedStore, limit: u32) -> Result<()> {
    use crate::models::Classification;

    println!("Processed messages: {}", store.count()?);
    println!(
        "  Promising:     {}",
        store.count_by_classification(Classification::Promising)?
    );
    println!(
        "  Not Promising: {}",
        store.count_by_classification(Classification::NotPromising)?
    );

    let recent = store.recent(limit)?;
    if !recent.is_empty() {
        println!("\nMost recent:");
        for record in recent {
            println!(
                "  {}  {:13}  {}  {}",
                record.processed_at.format("%Y-%m-%d %H:%M"),
                record.classification.to_string(),
                record.sender.as_deref().unwrap_or("(unknown sender)"),
                record.subject.as_deref().unwrap_or("(no subject)"),
            );
        }
    }
    Ok(())
}
