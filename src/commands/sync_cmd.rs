//! Sync CLI commands for driving the outbox processor.

use chrono::Duration;
use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, SyncSettings};
use crate::db::OutboxRepository;
use crate::sync::{
    ApiClient, CycleReport, OutboxProcessor, ProcessorSettings, StaticCredentials,
};

/// Push local changes to the backend
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Run a single sync cycle (the default)
    Run,

    /// Keep syncing at the configured interval until interrupted
    Watch,

    /// Show outbox queue statistics
    Status,

    /// Re-queue failed events by id
    Retry {
        /// Event IDs (UUIDs)
        event_ids: Vec<String>,
    },

    /// Delete completed events older than retention
    Purge {
        /// Override the retention window in days
        #[arg(long)]
        days: Option<i64>,
    },
}

fn processor_settings(settings: &SyncSettings) -> ProcessorSettings {
    ProcessorSettings {
        batch_size: settings.batch_size,
        reclaim_after: Duration::seconds(settings.reclaim_after_secs),
        stale_after: Duration::seconds(settings.stale_after_secs),
        retention: Duration::days(settings.retention_days),
    }
}

fn build_processor(
    pool: &SqlitePool,
    config: &Config,
) -> Result<OutboxProcessor, Box<dyn std::error::Error>> {
    if !config.api.is_configured() {
        return Err("Sync not configured. Add api.base_url and api.api_key to config, \
                    or set LUME_API_URL and LUME_API_KEY."
            .into());
    }
    let base_url = config.api.base_url.clone().unwrap_or_default();
    let api_key = config.api.api_key.clone().unwrap_or_default();
    let client = ApiClient::new(
        base_url,
        api_key,
        Box::new(StaticCredentials::new(config.api.bearer_token.clone())),
    );
    Ok(OutboxProcessor::new(
        pool.clone(),
        Arc::new(client),
        processor_settings(&config.sync),
    ))
}

fn print_report(report: &CycleReport) {
    if report.is_idle() {
        println!("Nothing to sync.");
        return;
    }
    println!("Synced:    {}", report.completed);
    println!("Failed:    {}", report.failed);
    if report.deferred > 0 {
        println!("Deferred:  {}", report.deferred);
    }
    if report.reclaimed > 0 {
        println!("Reclaimed: {}", report.reclaimed);
    }
    if report.purged > 0 {
        println!("Purged:    {}", report.purged);
    }
    if report.stale > 0 {
        println!("Stale:     {}", report.stale);
    }
}

impl SyncCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None | Some(SyncSubcommand::Run) => self.run_once(pool, config).await,
            Some(SyncSubcommand::Watch) => self.watch(pool, config).await,
            Some(SyncSubcommand::Status) => self.status(pool, config).await,
            Some(SyncSubcommand::Retry { event_ids }) => self.retry(pool, event_ids).await,
            Some(SyncSubcommand::Purge { days }) => self.purge(pool, config, *days).await,
        }
    }

    async fn run_once(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let processor = build_processor(pool, config)?;
        match processor.run_cycle().await? {
            Some(report) => print_report(&report),
            None => println!("Another sync cycle is already running."),
        }
        Ok(())
    }

    async fn watch(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let processor = build_processor(pool, config)?;
        let interval = std::time::Duration::from_secs(config.sync.interval_secs);
        println!(
            "Watching outbox every {}s. Press Ctrl-C to stop.",
            config.sync.interval_secs
        );
        processor.run_forever(interval).await;
        Ok(())
    }

    async fn status(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let outbox = OutboxRepository::new(pool.clone());
        let stats = outbox
            .get_statistics(
                Some(&config.owner),
                Duration::seconds(config.sync.stale_after_secs),
            )
            .await?;

        println!("Outbox Status");
        println!("=============");
        println!();
        println!("Total:      {}", stats.total);
        println!("Pending:    {}", stats.pending);
        println!("Processing: {}", stats.processing);
        println!("Completed:  {}", stats.completed);
        println!("Failed:     {}", stats.failed);
        println!("Stale:      {}", stats.stale);
        if let Some(oldest) = stats.oldest_pending {
            println!();
            println!("Oldest pending:   {}", oldest.to_rfc3339());
        }
        if let Some(newest) = stats.newest_completed {
            println!("Newest completed: {}", newest.to_rfc3339());
        }

        if !config.api.is_configured() {
            println!();
            println!("Backend: not configured (events will queue locally)");
        }
        Ok(())
    }

    async fn retry(
        &self,
        pool: &SqlitePool,
        event_ids: &[String],
    ) -> Result<(), Box<dyn std::error::Error>> {
        if event_ids.is_empty() {
            return Err("Provide at least one event id".into());
        }
        let ids: Result<Vec<Uuid>, String> = event_ids
            .iter()
            .map(|id| {
                Uuid::parse_str(id).map_err(|_| format!("Invalid event UUID: {}", id))
            })
            .collect();
        let ids = ids?;

        let outbox = OutboxRepository::new(pool.clone());
        let reset = outbox.reset_for_retry(&ids).await?;
        println!("Re-queued {} of {} event(s)", reset, ids.len());
        if reset < ids.len() {
            println!("Events past their retry budget are not re-queued.");
        }
        Ok(())
    }

    async fn purge(
        &self,
        pool: &SqlitePool,
        config: &Config,
        days: Option<i64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let retention = Duration::days(days.unwrap_or(config.sync.retention_days));
        let outbox = OutboxRepository::new(pool.clone());
        let purged = outbox.purge_completed(retention).await?;
        println!("Purged {} completed event(s)", purged);
        Ok(())
    }
}
