//! Progress entry repository.
//!
//! `save` is the write path of the outbox pattern: natural-key dedup,
//! entity upsert, and outbox enqueue all happen inside one transaction,
//! so a crash can never leave an entity without its sync intent (or the
//! reverse).

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{EntityKind, ProgressEntry, ProgressMetric, SyncStatus};
use crate::sync::{ChangeNotifier, ProgressPayload};

use super::outbox_repo::{insert_event, NewOutboxEvent};
use super::{
    ensure_owner, parse_date, parse_opt_time, parse_timestamp, parse_uuid, StoreError,
};

/// Read filters for [`ProgressEntryRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    pub metric: Option<ProgressMetric>,
    pub status: Option<SyncStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    owner_id: String,
    metric: String,
    quantity: f64,
    unit: String,
    recorded_on: String,
    recorded_at: Option<String>,
    note: Option<String>,
    backend_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<ProgressEntry, StoreError> {
        Ok(ProgressEntry {
            id: parse_uuid(&self.id)?,
            owner_id: self.owner_id,
            metric: ProgressMetric::from_str(&self.metric).map_err(StoreError::Corrupt)?,
            quantity: self.quantity,
            unit: self.unit,
            recorded_on: parse_date(&self.recorded_on)?,
            recorded_at: parse_opt_time(&self.recorded_at)?,
            note: self.note,
            backend_id: self.backend_id,
            sync_status: SyncStatus::from_str(&self.sync_status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub struct ProgressEntryRepository {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl ProgressEntryRepository {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Saves an entry, deduplicating on owner + metric + date (+ time).
    ///
    /// - exact duplicate: returns the existing id, no event, no notification
    /// - changed quantity: updates in place, clears `backend_id`, resets
    ///   status to pending, and enqueues a correcting event
    /// - no match: inserts and enqueues a create event
    pub async fn save(&self, entry: &ProgressEntry) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_owner(&mut tx, &entry.owner_id).await?;

        let time_str = entry.recorded_at.map(|t| t.format("%H:%M:%S").to_string());
        let existing: Option<EntryRow> = sqlx::query_as(
            "SELECT * FROM progress_entries
             WHERE owner_id = ? AND metric = ? AND recorded_on = ? AND recorded_at IS ?",
        )
        .bind(&entry.owner_id)
        .bind(entry.metric.as_str())
        .bind(entry.recorded_on.to_string())
        .bind(&time_str)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let current = row.into_entry()?;
                if !current.differs_from(entry.quantity) {
                    // Exact duplicate submission
                    tracing::debug!(id = %current.id, "duplicate progress entry ignored");
                    return Ok(current.id);
                }

                let now = Utc::now();
                sqlx::query(
                    "UPDATE progress_entries
                     SET quantity = ?, unit = ?, note = ?, backend_id = NULL,
                         sync_status = 'pending', updated_at = ?
                     WHERE id = ?",
                )
                .bind(entry.quantity)
                .bind(&entry.unit)
                .bind(&entry.note)
                .bind(now.to_rfc3339())
                .bind(current.id.to_string())
                .execute(&mut *tx)
                .await?;

                let mut corrected = current.clone();
                corrected.quantity = entry.quantity;
                corrected.unit = entry.unit.clone();
                corrected.note = entry.note.clone();

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::ProgressEntry,
                        entity_id: current.id,
                        owner_id: current.owner_id.clone(),
                        is_new_record: false,
                        metadata: serde_json::to_string(&ProgressPayload::from(&corrected))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(current.id, &current.owner_id, EntityKind::ProgressEntry, false);
                Ok(current.id)
            }
            None => {
                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    r#"
                    INSERT INTO progress_entries
                        (id, owner_id, metric, quantity, unit, recorded_on, recorded_at,
                         note, backend_id, sync_status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 'pending', ?, ?)
                    "#,
                )
                .bind(entry.id.to_string())
                .bind(&entry.owner_id)
                .bind(entry.metric.as_str())
                .bind(entry.quantity)
                .bind(&entry.unit)
                .bind(entry.recorded_on.to_string())
                .bind(&time_str)
                .bind(&entry.note)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::ProgressEntry,
                        entity_id: entry.id,
                        owner_id: entry.owner_id.clone(),
                        is_new_record: true,
                        metadata: serde_json::to_string(&ProgressPayload::from(entry))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(entry.id, &entry.owner_id, EntityKind::ProgressEntry, true);
                Ok(entry.id)
            }
        }
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<ProgressEntry>, StoreError> {
        let row: Option<EntryRow> =
            sqlx::query_as("SELECT * FROM progress_entries WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Pure read, most recent first.
    pub async fn list(
        &self,
        owner_id: &str,
        filter: &ProgressFilter,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressEntry>, StoreError> {
        let mut sql = String::from("SELECT * FROM progress_entries WHERE owner_id = ?");
        if filter.metric.is_some() {
            sql.push_str(" AND metric = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND sync_status = ?");
        }
        if filter.from.is_some() {
            sql.push_str(" AND recorded_on >= ?");
        }
        if filter.to.is_some() {
            sql.push_str(" AND recorded_on <= ?");
        }
        sql.push_str(" ORDER BY recorded_on DESC, created_at DESC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, EntryRow>(&sql).bind(owner_id);
        if let Some(metric) = filter.metric {
            query = query.bind(metric.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(from) = filter.from {
            query = query.bind(from.to_string());
        }
        if let Some(to) = filter.to {
            query = query.bind(to.to_string());
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    /// Marks an entry as synced with its backend-assigned id.
    pub async fn update_backend_id(
        &self,
        owner_id: &str,
        id: Uuid,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE progress_entries
             SET backend_id = ?, sync_status = 'synced', updated_at = ?
             WHERE id = ? AND owner_id = ?",
        )
        .bind(backend_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EntryNotFound(id));
        }
        Ok(())
    }

    pub async fn update_sync_status(
        &self,
        owner_id: &str,
        id: Uuid,
        status: SyncStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE progress_entries SET sync_status = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EntryNotFound(id));
        }
        Ok(())
    }

    /// Bulk delete with referential cleanup: the outbox events referencing
    /// the deleted entries go in the same transaction.
    pub async fn delete_all(
        &self,
        owner_id: &str,
        metric: Option<ProgressMetric>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut sql = String::from("SELECT id FROM progress_entries WHERE owner_id = ?");
        if metric.is_some() {
            sql.push_str(" AND metric = ?");
        }
        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(owner_id);
        if let Some(metric) = metric {
            query = query.bind(metric.as_str());
        }
        let ids: Vec<(String,)> = query.fetch_all(&mut *tx).await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM progress_entries WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    /// Maintenance: collapses rows sharing a natural key down to the
    /// earliest-created one, removing the others and their events.
    pub async fn remove_duplicates(&self, owner_id: &str) -> Result<usize, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM progress_entries WHERE owner_id = ? ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut seen: HashSet<(String, String, Option<String>)> = HashSet::new();
        let mut duplicates = Vec::new();
        for row in rows {
            let key = (row.metric.clone(), row.recorded_on.clone(), row.recorded_at.clone());
            if !seen.insert(key) {
                duplicates.push(row.id);
            }
        }

        if duplicates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for id in &duplicates {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM progress_entries WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(owner = owner_id, removed = duplicates.len(), "removed duplicate progress entries");
        Ok(duplicates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, OutboxRepository, ProfileRepository};
    use crate::models::EventStatus;
    use chrono::NaiveTime;
    use tempfile::TempDir;

    struct TestContext {
        repo: ProgressEntryRepository,
        outbox: OutboxRepository,
        notifier: ChangeNotifier,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        let notifier = ChangeNotifier::new();
        ProfileRepository::new(pool.clone())
            .ensure("user1", "User One")
            .await
            .unwrap();
        TestContext {
            repo: ProgressEntryRepository::new(pool.clone(), notifier.clone()),
            outbox: OutboxRepository::new(pool),
            notifier,
            _temp_dir: temp_dir,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn weight(quantity: f64) -> ProgressEntry {
        ProgressEntry::new("user1", ProgressMetric::Weight, quantity, date())
    }

    #[tokio::test]
    async fn test_save_creates_entity_and_create_event() {
        let ctx = setup().await;

        let entry = weight(70.0);
        let id = ctx.repo.save(&entry).await.unwrap();
        assert_eq!(id, entry.id);

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 70.0);
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert!(stored.backend_id.is_none());

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, id);
        assert!(events[0].is_new_record);
        assert_eq!(events[0].status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn test_exact_duplicate_is_noop() {
        let ctx = setup().await;

        let first = weight(70.0);
        let first_id = ctx.repo.save(&first).await.unwrap();

        // Same natural key, same quantity: no new row, no new event
        let duplicate = weight(70.0);
        let dup_id = ctx.repo.save(&duplicate).await.unwrap();
        assert_eq!(dup_id, first_id);

        let all = ctx
            .repo
            .list("user1", &ProgressFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_changed_quantity_updates_in_place_and_forces_resync() {
        let ctx = setup().await;

        let first = weight(70.0);
        let id = ctx.repo.save(&first).await.unwrap();
        ctx.repo.update_backend_id("user1", id, "abc123").await.unwrap();

        let corrected = weight(71.0);
        let corrected_id = ctx.repo.save(&corrected).await.unwrap();
        assert_eq!(corrected_id, id, "correction must reuse the existing row");

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 71.0);
        assert!(stored.backend_id.is_none(), "correction clears backend id");
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        let update_event = events.iter().find(|e| !e.is_new_record).unwrap();
        assert_eq!(update_event.entity_id, id);
        let payload: ProgressPayload = serde_json::from_str(&update_event.metadata).unwrap();
        assert_eq!(payload.quantity, 71.0);
    }

    #[tokio::test]
    async fn test_same_date_different_time_is_new_entry() {
        let ctx = setup().await;

        ctx.repo.save(&weight(70.0)).await.unwrap();
        let timed = weight(70.0).with_time(NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        ctx.repo.save(&timed).await.unwrap();

        let all = ctx
            .repo
            .list("user1", &ProgressFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_save_unknown_owner_rejected_without_side_effects() {
        let ctx = setup().await;

        let entry = ProgressEntry::new("ghost", ProgressMetric::Weight, 70.0, date());
        let err = ctx.repo.save(&entry).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOwner(_)));

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert!(events.is_empty(), "failed save must not leave an event behind");
    }

    #[tokio::test]
    async fn test_save_publishes_change_notification() {
        let ctx = setup().await;
        let mut rx = ctx.notifier.subscribe();

        let entry = weight(70.0);
        ctx.repo.save(&entry).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.entity_id, entry.id);
        assert_eq!(change.kind, EntityKind::ProgressEntry);
        assert!(change.is_new);

        // Correction publishes too, with is_new = false
        ctx.repo.save(&weight(72.0)).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert!(!change.is_new);
    }

    #[tokio::test]
    async fn test_list_filters_and_ordering() {
        let ctx = setup().await;

        for (day, quantity) in [(1, 70.0), (2, 69.5), (3, 69.0)] {
            let entry = ProgressEntry::new(
                "user1",
                ProgressMetric::Weight,
                quantity,
                NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            );
            ctx.repo.save(&entry).await.unwrap();
        }
        let fat = ProgressEntry::new("user1", ProgressMetric::BodyFat, 18.0, date());
        ctx.repo.save(&fat).await.unwrap();

        let all = ctx
            .repo
            .list("user1", &ProgressFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        // Most recent date first
        assert_eq!(all[0].recorded_on, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());

        let weights_only = ctx
            .repo
            .list(
                "user1",
                &ProgressFilter {
                    metric: Some(ProgressMetric::Weight),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(weights_only.len(), 3);

        let ranged = ctx
            .repo
            .list(
                "user1",
                &ProgressFilter {
                    from: Some(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()),
                    to: Some(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2, "date range plus the body fat entry on Jan 1 excluded");

        let capped = ctx
            .repo
            .list("user1", &ProgressFilter::default(), Some(2))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_update_backend_id_marks_synced() {
        let ctx = setup().await;
        let entry = weight(70.0);
        let id = ctx.repo.save(&entry).await.unwrap();

        ctx.repo.update_backend_id("user1", id, "abc123").await.unwrap();

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.backend_id.as_deref(), Some("abc123"));
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn test_update_backend_id_missing_entry() {
        let ctx = setup().await;
        let err = ctx
            .repo
            .update_backend_id("user1", Uuid::new_v4(), "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_sync_status_same_state_is_noop_success() {
        let ctx = setup().await;
        let entry = weight(70.0);
        let id = ctx.repo.save(&entry).await.unwrap();

        ctx.repo
            .update_sync_status("user1", id, SyncStatus::Pending)
            .await
            .unwrap();
        ctx.repo
            .update_sync_status("user1", id, SyncStatus::Syncing)
            .await
            .unwrap();

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn test_delete_all_cleans_up_events() {
        let ctx = setup().await;

        ctx.repo.save(&weight(70.0)).await.unwrap();
        let fat = ProgressEntry::new("user1", ProgressMetric::BodyFat, 18.0, date());
        ctx.repo.save(&fat).await.unwrap();

        let deleted = ctx
            .repo
            .delete_all("user1", Some(ProgressMetric::Weight))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        // Only the body fat event survives
        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, fat.id);

        let deleted = ctx.repo.delete_all("user1", None).await.unwrap();
        assert_eq!(deleted, 1);
        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_remove_duplicates_keeps_earliest() {
        let ctx = setup().await;

        let keeper = weight(70.0);
        ctx.repo.save(&keeper).await.unwrap();

        // Force duplicate rows past the dedup guard, as a buggy import would
        let rogue = weight(75.0);
        sqlx::query(
            "INSERT INTO progress_entries
                (id, owner_id, metric, quantity, unit, recorded_on, recorded_at, note,
                 backend_id, sync_status, created_at, updated_at)
             VALUES (?, 'user1', 'weight', 75.0, 'kg', ?, NULL, NULL, NULL, 'pending', ?, ?)",
        )
        .bind(rogue.id.to_string())
        .bind(date().to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&ctx.outbox_pool())
        .await
        .unwrap();

        let removed = ctx.repo.remove_duplicates("user1").await.unwrap();
        assert_eq!(removed, 1);

        let all = ctx
            .repo
            .list("user1", &ProgressFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, keeper.id);
    }

    impl TestContext {
        fn outbox_pool(&self) -> SqlitePool {
            // Repos share one pool; grab it through the repo under test
            self.repo.pool.clone()
        }
    }
}
