//! Outbox processor.
//!
//! Drains the durable queue in fixed-size batches: reclaim rows stranded
//! in `processing` by a crash, deliver eligible events oldest-first, then
//! purge completed rows past retention. Delivery is at-least-once; the
//! idempotency key on each request makes redelivery safe.

use chrono::Duration;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{OutboxRepository, StoreError};
use crate::models::OutboxEvent;

use super::api::RemoteBackend;
use super::handlers::dispatch;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Events taken per cycle.
    pub batch_size: i64,
    /// Age at which a `processing` row is considered abandoned.
    pub reclaim_after: Duration,
    /// Age at which an undelivered event is reported as stale.
    pub stale_after: Duration,
    /// How long completed events are kept before purging.
    pub retention: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            reclaim_after: Duration::minutes(5),
            stale_after: Duration::minutes(5),
            retention: Duration::days(7),
        }
    }
}

/// What one cycle did, for logging and `sync run` output.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub fetched: usize,
    /// Events skipped because an earlier event in the batch targets the
    /// same entity. They stay queued for the next cycle.
    pub deferred: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failures that exhausted their retry budget this cycle.
    pub exhausted: usize,
    pub purged: usize,
    pub stale: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0 && self.reclaimed == 0 && self.purged == 0
    }
}

pub struct OutboxProcessor {
    pool: SqlitePool,
    outbox: OutboxRepository,
    backend: Arc<dyn RemoteBackend>,
    settings: ProcessorSettings,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl OutboxProcessor {
    pub fn new(
        pool: SqlitePool,
        backend: Arc<dyn RemoteBackend>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            outbox: OutboxRepository::new(pool.clone()),
            pool,
            backend,
            settings,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one full cycle. Returns None if another cycle is already in
    /// flight; cycles never overlap.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, StoreError> {
        let _guard = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("cycle already in flight, skipping");
                return Ok(None);
            }
        };

        let mut report = CycleReport::default();

        report.reclaimed = self
            .outbox
            .reclaim_stuck_events(self.settings.reclaim_after)
            .await?;
        if report.reclaimed > 0 {
            tracing::info!(count = report.reclaimed, "reclaimed abandoned events");
        }

        let events = self
            .outbox
            .fetch_pending_events(None, Some(self.settings.batch_size))
            .await?;
        report.fetched = events.len();

        // At most one event per entity per cycle; a correcting event right
        // behind a create waits for the next cycle.
        let mut touched: HashSet<Uuid> = HashSet::new();
        for event in events {
            if !touched.insert(event.entity_id) {
                report.deferred += 1;
                continue;
            }
            self.process_event(event, &mut report).await?;
        }

        report.purged = self.outbox.purge_completed(self.settings.retention).await?;

        let stale = self
            .outbox
            .get_stale_events(None, self.settings.stale_after)
            .await?;
        report.stale = stale.len();
        for event in &stale {
            tracing::warn!(event = %event, "event stale, not yet delivered");
        }

        if !report.is_idle() {
            tracing::info!(
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                purged = report.purged,
                "cycle finished"
            );
        }
        Ok(Some(report))
    }

    async fn process_event(
        &self,
        event: OutboxEvent,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        self.outbox.mark_as_processing(event.id).await?;

        match dispatch(self.backend.as_ref(), &event).await {
            Ok(backend_id) => {
                if let Err(e) = self.record_delivery(&event, &backend_id).await {
                    // Leave the event in processing; reclaim retries it and
                    // the idempotency key absorbs the redelivery.
                    tracing::warn!(event = %event, error = %e, "delivered but not recorded");
                    return Ok(());
                }
                self.outbox.mark_as_completed(event.id).await?;
                report.completed += 1;
                tracing::debug!(event = %event, backend_id = %backend_id, "event delivered");
            }
            Err(e) => {
                let updated = self.outbox.mark_as_failed(event.id, &e.to_string()).await?;
                report.failed += 1;
                if updated.is_terminal() {
                    report.exhausted += 1;
                    self.mark_entity_failed(&updated).await?;
                    tracing::warn!(event = %updated, error = %e, "retries exhausted");
                } else {
                    tracing::debug!(event = %updated, error = %e, "delivery failed, will retry");
                }
            }
        }
        Ok(())
    }

    /// Writes the backend id onto the entity row. A missing row means the
    /// entity was deleted locally after enqueueing; delivery still counts.
    async fn record_delivery(
        &self,
        event: &OutboxEvent,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET backend_id = ?, sync_status = 'synced', updated_at = ? WHERE id = ?",
            event.event_type.table()
        );
        let result = sqlx::query(&sql)
            .bind(backend_id)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(event.entity_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(event = %event, "entity gone before delivery recorded");
        }
        Ok(())
    }

    async fn mark_entity_failed(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET sync_status = 'failed', updated_at = ? WHERE id = ?",
            event.event_type.table()
        );
        sqlx::query(&sql)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(event.entity_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Runs cycles forever at the given interval. Intended to be spawned
    /// as a background task or driven by `lume sync watch`.
    pub async fn run_forever(&self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "cycle failed");
            }
        }
    }
}
