//! The durable event queue backing the sync engine.
//!
//! Events are plain rows in `outbox_events`. Entity repositories insert
//! them through [`insert_event`] inside their own save transaction, so an
//! entity write and its sync intent are all-or-nothing. The processor
//! drives all status transitions through this repository.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    EntityKind, EventStatus, OutboxEvent, OutboxStatistics, DEFAULT_MAX_ATTEMPTS,
};

use super::{parse_opt_timestamp, parse_timestamp, parse_uuid, StoreError};

/// Fields required to enqueue a new sync intent.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_type: EntityKind,
    pub entity_id: Uuid,
    pub owner_id: String,
    pub is_new_record: bool,
    /// JSON snapshot of the remote request fields.
    pub metadata: String,
    pub priority: i64,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    event_type: String,
    entity_id: String,
    owner_id: String,
    status: String,
    is_new_record: bool,
    metadata: String,
    priority: i64,
    attempt_count: i64,
    max_attempts: i64,
    created_at: String,
    last_attempt_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<OutboxEvent, StoreError> {
        Ok(OutboxEvent {
            id: parse_uuid(&self.id)?,
            event_type: EntityKind::from_str(&self.event_type).map_err(StoreError::Corrupt)?,
            entity_id: parse_uuid(&self.entity_id)?,
            owner_id: self.owner_id,
            status: EventStatus::from_str(&self.status).map_err(StoreError::Corrupt)?,
            is_new_record: self.is_new_record,
            metadata: self.metadata,
            priority: self.priority,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            created_at: parse_timestamp(&self.created_at)?,
            last_attempt_at: parse_opt_timestamp(&self.last_attempt_at)?,
            completed_at: parse_opt_timestamp(&self.completed_at)?,
            error_message: self.error_message,
        })
    }
}

/// Inserts an event on any executor, usable inside an entity repository's
/// transaction. Returns the id of the new event.
pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    new: &NewOutboxEvent,
) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (id, event_type, entity_id, owner_id, status, is_new_record, metadata,
             priority, attempt_count, max_attempts, created_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.event_type.as_str())
    .bind(new.entity_id.to_string())
    .bind(&new.owner_id)
    .bind(new.is_new_record)
    .bind(&new.metadata)
    .bind(new.priority)
    .bind(DEFAULT_MAX_ATTEMPTS)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(id)
}

pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueues a standalone event outside any entity transaction.
    pub async fn create_event(&self, new: NewOutboxEvent) -> Result<OutboxEvent, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_event(&mut conn, &new).await?;
        drop(conn);
        self.get_event(id)
            .await?
            .ok_or(StoreError::EventNotFound(id))
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<OutboxEvent>, StoreError> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM outbox_events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(EventRow::into_event).transpose()
    }

    /// Returns events eligible for delivery: pending, plus failed events
    /// that still have retry budget. Highest priority first, oldest first
    /// within a priority.
    pub async fn fetch_pending_events(
        &self,
        owner_id: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut sql = String::from(
            "SELECT * FROM outbox_events
             WHERE (status = 'pending' OR (status = 'failed' AND attempt_count < max_attempts))",
        );
        if owner_id.is_some() {
            sql.push_str(" AND owner_id = ?");
        }
        sql.push_str(" ORDER BY priority DESC, created_at ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, EventRow>(&sql);
        if let Some(owner) = owner_id {
            query = query.bind(owner);
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Transitions pending/failed -> processing, incrementing the attempt
    /// counter and stamping the attempt time.
    pub async fn mark_as_processing(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events
             SET status = 'processing', attempt_count = attempt_count + 1, last_attempt_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_event(id).await? {
                // Already processing; the single-processor guard makes this benign.
                Some(_) => Ok(()),
                None => Err(StoreError::EventNotFound(id)),
            };
        }
        Ok(())
    }

    /// Transitions processing -> completed.
    pub async fn mark_as_completed(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events
             SET status = 'completed', completed_at = ?, error_message = NULL
             WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_event(id).await?.is_none() {
            return Err(StoreError::EventNotFound(id));
        }
        Ok(())
    }

    /// Transitions processing -> failed, recording the error text. The
    /// caller inspects `attempt_count < max_attempts` on the returned event
    /// to decide whether the failure is terminal.
    pub async fn mark_as_failed(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> Result<OutboxEvent, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events
             SET status = 'failed', error_message = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(error_message)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        let event = self
            .get_event(id)
            .await?
            .ok_or(StoreError::EventNotFound(id))?;
        if result.rows_affected() == 0 {
            tracing::warn!(event_id = %id, status = %event.status, "mark_as_failed on non-processing event");
        }
        Ok(event)
    }

    /// Manual override: zeroes the attempt counter and re-queues events
    /// that still have retry budget. Exhausted events are left untouched.
    /// Returns the number of events re-queued.
    pub async fn reset_for_retry(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        let mut reset = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE outbox_events
                 SET status = 'pending', attempt_count = 0, error_message = NULL
                 WHERE id = ? AND attempt_count < max_attempts",
            )
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
            reset += result.rows_affected() as usize;
        }
        Ok(reset)
    }

    /// Reclaims events stranded in `processing` by a crashed run: anything
    /// whose last attempt is older than `older_than` goes back to pending.
    pub async fn reclaim_stuck_events(&self, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let result = sqlx::query(
            "UPDATE outbox_events
             SET status = 'pending'
             WHERE status = 'processing' AND (last_attempt_at IS NULL OR last_attempt_at < ?)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Deletes completed events older than the retention window.
    pub async fn purge_completed(&self, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'completed' AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Orphan cleanup used by entity-level cascading deletes.
    pub async fn delete_events_for_entities(&self, entity_ids: &[Uuid]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for entity_id in entity_ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(entity_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_all_events(&self, owner_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM outbox_events WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Events sitting unattended longer than `stale_after`: pending rows
    /// never picked up, or processing rows whose last attempt is old.
    pub async fn get_stale_events(
        &self,
        owner_id: Option<&str>,
        stale_after: Duration,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let cutoff = (Utc::now() - stale_after).to_rfc3339();
        let mut sql = String::from(
            "SELECT * FROM outbox_events
             WHERE ((status = 'pending' AND last_attempt_at IS NULL AND created_at < ?)
                 OR (status = 'processing' AND last_attempt_at < ?))",
        );
        if owner_id.is_some() {
            sql.push_str(" AND owner_id = ?");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(&cutoff).bind(&cutoff);
        if let Some(owner) = owner_id {
            query = query.bind(owner);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Aggregate counters for observability.
    pub async fn get_statistics(
        &self,
        owner_id: Option<&str>,
        stale_after: Duration,
    ) -> Result<OutboxStatistics, StoreError> {
        let mut sql = String::from(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                    MIN(CASE WHEN status = 'pending' THEN created_at END),
                    MAX(CASE WHEN status = 'completed' THEN completed_at END)
             FROM outbox_events",
        );
        if owner_id.is_some() {
            sql.push_str(" WHERE owner_id = ?");
        }

        let mut query = sqlx::query_as::<
            _,
            (i64, i64, i64, i64, i64, Option<String>, Option<String>),
        >(&sql);
        if let Some(owner) = owner_id {
            query = query.bind(owner);
        }
        let (total, pending, processing, completed, failed, oldest_pending, newest_completed) =
            query.fetch_one(&self.pool).await?;

        let stale = self.get_stale_events(owner_id, stale_after).await?.len() as i64;

        Ok(OutboxStatistics {
            total,
            pending,
            processing,
            completed,
            failed,
            stale,
            oldest_pending: parse_opt_timestamp(&oldest_pending)?,
            newest_completed: parse_opt_timestamp(&newest_completed)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup() -> (OutboxRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        (OutboxRepository::new(pool), temp_dir)
    }

    fn new_event(owner: &str) -> NewOutboxEvent {
        NewOutboxEvent {
            event_type: EntityKind::ProgressEntry,
            entity_id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            is_new_record: true,
            metadata: "{}".to_string(),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_pending() {
        let (repo, _temp) = setup().await;

        let event = repo.create_event(new_event("user1")).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempt_count, 0);
        assert!(event.is_new_record);

        let pending = repo.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, event.id);
    }

    #[tokio::test]
    async fn test_fetch_pending_orders_by_priority_then_age() {
        let (repo, _temp) = setup().await;

        let low_old = repo.create_event(new_event("user1")).await.unwrap();
        let mut high = new_event("user1");
        high.priority = 10;
        let high = repo.create_event(high).await.unwrap();
        let low_new = repo.create_event(new_event("user1")).await.unwrap();

        let pending = repo.fetch_pending_events(None, None).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![high.id, low_old.id, low_new.id]);
    }

    #[tokio::test]
    async fn test_fetch_pending_filters_by_owner_and_limit() {
        let (repo, _temp) = setup().await;

        repo.create_event(new_event("user1")).await.unwrap();
        repo.create_event(new_event("user1")).await.unwrap();
        repo.create_event(new_event("user2")).await.unwrap();

        let user1 = repo.fetch_pending_events(Some("user1"), None).await.unwrap();
        assert_eq!(user1.len(), 2);

        let capped = repo.fetch_pending_events(None, Some(1)).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_processing_lifecycle() {
        let (repo, _temp) = setup().await;
        let event = repo.create_event(new_event("user1")).await.unwrap();

        repo.mark_as_processing(event.id).await.unwrap();
        let processing = repo.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(processing.status, EventStatus::Processing);
        assert_eq!(processing.attempt_count, 1);
        assert!(processing.last_attempt_at.is_some());

        repo.mark_as_completed(event.id).await.unwrap();
        let completed = repo.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(completed.status, EventStatus::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_as_processing_unknown_event() {
        let (repo, _temp) = setup().await;
        let err = repo.mark_as_processing(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_event_retryable_until_budget_exhausted() {
        let (repo, _temp) = setup().await;
        let event = repo.create_event(new_event("user1")).await.unwrap();

        for attempt in 1..=DEFAULT_MAX_ATTEMPTS {
            repo.mark_as_processing(event.id).await.unwrap();
            let failed = repo.mark_as_failed(event.id, "connection refused").await.unwrap();
            assert_eq!(failed.attempt_count, attempt);

            let pending = repo.fetch_pending_events(None, None).await.unwrap();
            if attempt < DEFAULT_MAX_ATTEMPTS {
                assert_eq!(pending.len(), 1, "attempt {} should stay retryable", attempt);
            } else {
                assert!(pending.is_empty(), "exhausted event must not be re-fetched");
            }
        }

        let terminal = repo.get_event(event.id).await.unwrap().unwrap();
        assert!(terminal.is_terminal());
        assert_eq!(terminal.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_reset_for_retry_skips_exhausted() {
        let (repo, _temp) = setup().await;
        let fresh = repo.create_event(new_event("user1")).await.unwrap();
        let spent = repo.create_event(new_event("user1")).await.unwrap();

        // Burn the whole budget of one event
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            repo.mark_as_processing(spent.id).await.unwrap();
            repo.mark_as_failed(spent.id, "boom").await.unwrap();
        }
        repo.mark_as_processing(fresh.id).await.unwrap();
        repo.mark_as_failed(fresh.id, "transient").await.unwrap();

        let reset = repo.reset_for_retry(&[fresh.id, spent.id]).await.unwrap();
        assert_eq!(reset, 1);

        let fresh = repo.get_event(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, EventStatus::Pending);
        assert_eq!(fresh.attempt_count, 0);

        let spent = repo.get_event(spent.id).await.unwrap().unwrap();
        assert_eq!(spent.status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_reclaim_stuck_events() {
        let (repo, _temp) = setup().await;
        let event = repo.create_event(new_event("user1")).await.unwrap();
        repo.mark_as_processing(event.id).await.unwrap();

        // Attempt just happened, nothing to reclaim yet
        let reclaimed = repo.reclaim_stuck_events(Duration::minutes(5)).await.unwrap();
        assert_eq!(reclaimed, 0);

        // With a zero window the processing row counts as stuck
        let reclaimed = repo.reclaim_stuck_events(Duration::seconds(0)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let event = repo.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        // The wasted attempt still counts
        assert_eq!(event.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_purge_completed_respects_retention() {
        let (repo, _temp) = setup().await;
        let event = repo.create_event(new_event("user1")).await.unwrap();
        repo.mark_as_processing(event.id).await.unwrap();
        repo.mark_as_completed(event.id).await.unwrap();

        let purged = repo.purge_completed(Duration::days(7)).await.unwrap();
        assert_eq!(purged, 0, "recent completions are retained");

        let purged = repo.purge_completed(Duration::seconds(0)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get_event(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_events_for_entities() {
        let (repo, _temp) = setup().await;
        let keep = repo.create_event(new_event("user1")).await.unwrap();
        let drop1 = repo.create_event(new_event("user1")).await.unwrap();
        let drop2 = repo.create_event(new_event("user1")).await.unwrap();

        repo.delete_events_for_entities(&[drop1.entity_id, drop2.entity_id])
            .await
            .unwrap();

        assert!(repo.get_event(keep.id).await.unwrap().is_some());
        assert!(repo.get_event(drop1.id).await.unwrap().is_none());
        assert!(repo.get_event(drop2.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_statistics() {
        let (repo, _temp) = setup().await;

        let done = repo.create_event(new_event("user1")).await.unwrap();
        repo.mark_as_processing(done.id).await.unwrap();
        repo.mark_as_completed(done.id).await.unwrap();

        let failed = repo.create_event(new_event("user1")).await.unwrap();
        repo.mark_as_processing(failed.id).await.unwrap();
        repo.mark_as_failed(failed.id, "HTTP 503").await.unwrap();

        repo.create_event(new_event("user1")).await.unwrap();
        repo.create_event(new_event("user2")).await.unwrap();

        let stats = repo.get_statistics(None, Duration::minutes(5)).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.oldest_pending.is_some());
        assert!(stats.newest_completed.is_some());

        let user2 = repo.get_statistics(Some("user2"), Duration::minutes(5)).await.unwrap();
        assert_eq!(user2.total, 1);
        assert_eq!(user2.pending, 1);
    }

    #[tokio::test]
    async fn test_stale_events_detection() {
        let (repo, _temp) = setup().await;

        let waiting = repo.create_event(new_event("user1")).await.unwrap();
        let stuck = repo.create_event(new_event("user1")).await.unwrap();
        repo.mark_as_processing(stuck.id).await.unwrap();

        // Generous window: nothing is stale yet
        let stale = repo.get_stale_events(None, Duration::minutes(5)).await.unwrap();
        assert!(stale.is_empty());

        // Zero window: both the unpicked pending event and the old
        // processing event count
        let stale = repo.get_stale_events(None, Duration::seconds(0)).await.unwrap();
        let ids: Vec<Uuid> = stale.iter().map(|e| e.id).collect();
        assert!(ids.contains(&waiting.id));
        assert!(ids.contains(&stuck.id));
    }
}
