use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use palmier_storage::{AssumeAlive, HttpLivenessProbe, LivenessProbe, MemoryStore, RecordStore};
use palmier_sync::{
    connect_store, maybe_build_scheduler, pipeline_from_config, RunCoordinator, SyncConfig,
    SyncPipeline,
};
use palmier_web::{AppState, WebConfig};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "palmier")]
#[command(about = "Nice event aggregator: crawl, enrich and publish local events")]
struct Cli {
    /// Use an in-memory store and skip link checks.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled source once, then the maintenance passes.
    Sync,
    /// Serve the control API and the daily schedule.
    Serve,
    /// Expire published events that already started.
    Expire,
    /// Purge stored duplicates, keeping the best-scored copy.
    Dedup,
    /// Expire published events whose source page is gone.
    CheckUrls,
    /// Recompute match scores for tier-scored sources.
    Recalibrate,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("palmier=info".parse()?);
    if std::env::var_os("PALMIER_LOG_JSON").is_some() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn build_pipeline(config: SyncConfig, dry_run: bool) -> Result<SyncPipeline> {
    let (store, probe): (Arc<dyn RecordStore>, Arc<dyn LivenessProbe>) = if dry_run {
        info!("dry run: in-memory store, link checks disabled");
        (Arc::new(MemoryStore::new()), Arc::new(AssumeAlive))
    } else {
        (
            connect_store(&config).await?,
            Arc::new(HttpLivenessProbe::new(&config.user_agent)?),
        )
    };
    pipeline_from_config(config, store, probe).await
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = build_pipeline(config, cli.dry_run).await?;
            let summary = pipeline.run_once().await;
            info!(
                run_id = %summary.run_id,
                found = summary.events_found,
                new = summary.events_new,
                "sync complete"
            );
            print_json(&summary)?;
        }
        Commands::Serve => {
            let pipeline = Arc::new(build_pipeline(config.clone(), cli.dry_run).await?);
            let coordinator = Arc::new(RunCoordinator::default());
            let scheduler =
                maybe_build_scheduler(&config, Arc::clone(&pipeline), Arc::clone(&coordinator))
                    .await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
            }
            palmier_web::serve(AppState::new(pipeline, coordinator), &WebConfig::from_env())
                .await?;
        }
        Commands::Expire => {
            let pipeline = build_pipeline(config, cli.dry_run).await?;
            let expired = pipeline.expire_past().await?;
            print_json(&json!({ "expired": expired }))?;
        }
        Commands::Dedup => {
            let pipeline = build_pipeline(config, cli.dry_run).await?;
            let purged = pipeline.purge_duplicates().await?;
            print_json(&json!({ "purged": purged }))?;
        }
        Commands::CheckUrls => {
            let pipeline = build_pipeline(config, cli.dry_run).await?;
            let expired = pipeline.check_urls().await?;
            print_json(&json!({ "dead_links": expired }))?;
        }
        Commands::Recalibrate => {
            let pipeline = build_pipeline(config, cli.dry_run).await?;
            let updated = pipeline.recalibrate().await?;
            print_json(&json!({ "recalibrated": updated }))?;
        }
    }

    Ok(())
}
