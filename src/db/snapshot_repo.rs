//! Activity snapshot repository.
//!
//! One row per owner per day. Device imports re-submit the same day many
//! times as totals climb, so the update-in-place path is the hot path here.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{ActivitySnapshot, EntityKind, SyncStatus};
use crate::sync::{ChangeNotifier, SnapshotPayload};

use super::outbox_repo::{insert_event, NewOutboxEvent};
use super::{ensure_owner, parse_date, parse_timestamp, parse_uuid, StoreError};

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    owner_id: String,
    snapshot_on: String,
    steps: i64,
    active_energy: f64,
    exercise_minutes: i64,
    stand_hours: i64,
    backend_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<ActivitySnapshot, StoreError> {
        Ok(ActivitySnapshot {
            id: parse_uuid(&self.id)?,
            owner_id: self.owner_id,
            snapshot_on: parse_date(&self.snapshot_on)?,
            steps: self.steps,
            active_energy: self.active_energy,
            exercise_minutes: self.exercise_minutes,
            stand_hours: self.stand_hours,
            backend_id: self.backend_id,
            sync_status: SyncStatus::from_str(&self.sync_status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub struct ActivitySnapshotRepository {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl ActivitySnapshotRepository {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Saves a snapshot, deduplicating on owner + date.
    pub async fn save(&self, snapshot: &ActivitySnapshot) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_owner(&mut tx, &snapshot.owner_id).await?;

        let existing: Option<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM activity_snapshots WHERE owner_id = ? AND snapshot_on = ?",
        )
        .bind(&snapshot.owner_id)
        .bind(snapshot.snapshot_on.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let current = row.into_snapshot()?;
                if !current.differs_from(snapshot) {
                    tracing::debug!(id = %current.id, "unchanged activity snapshot ignored");
                    return Ok(current.id);
                }

                sqlx::query(
                    "UPDATE activity_snapshots
                     SET steps = ?, active_energy = ?, exercise_minutes = ?, stand_hours = ?,
                         backend_id = NULL, sync_status = 'pending', updated_at = ?
                     WHERE id = ?",
                )
                .bind(snapshot.steps)
                .bind(snapshot.active_energy)
                .bind(snapshot.exercise_minutes)
                .bind(snapshot.stand_hours)
                .bind(Utc::now().to_rfc3339())
                .bind(current.id.to_string())
                .execute(&mut *tx)
                .await?;

                let mut corrected = current.clone();
                corrected.steps = snapshot.steps;
                corrected.active_energy = snapshot.active_energy;
                corrected.exercise_minutes = snapshot.exercise_minutes;
                corrected.stand_hours = snapshot.stand_hours;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::ActivitySnapshot,
                        entity_id: current.id,
                        owner_id: current.owner_id.clone(),
                        is_new_record: false,
                        metadata: serde_json::to_string(&SnapshotPayload::from(&corrected))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier.publish(
                    current.id,
                    &current.owner_id,
                    EntityKind::ActivitySnapshot,
                    false,
                );
                Ok(current.id)
            }
            None => {
                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    r#"
                    INSERT INTO activity_snapshots
                        (id, owner_id, snapshot_on, steps, active_energy, exercise_minutes,
                         stand_hours, backend_id, sync_status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 'pending', ?, ?)
                    "#,
                )
                .bind(snapshot.id.to_string())
                .bind(&snapshot.owner_id)
                .bind(snapshot.snapshot_on.to_string())
                .bind(snapshot.steps)
                .bind(snapshot.active_energy)
                .bind(snapshot.exercise_minutes)
                .bind(snapshot.stand_hours)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::ActivitySnapshot,
                        entity_id: snapshot.id,
                        owner_id: snapshot.owner_id.clone(),
                        is_new_record: true,
                        metadata: serde_json::to_string(&SnapshotPayload::from(snapshot))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier.publish(
                    snapshot.id,
                    &snapshot.owner_id,
                    EntityKind::ActivitySnapshot,
                    true,
                );
                Ok(snapshot.id)
            }
        }
    }

    pub async fn get(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<ActivitySnapshot>, StoreError> {
        let row: Option<SnapshotRow> =
            sqlx::query_as("SELECT * FROM activity_snapshots WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }

    pub async fn list(
        &self,
        owner_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<ActivitySnapshot>, StoreError> {
        let mut sql = String::from("SELECT * FROM activity_snapshots WHERE owner_id = ?");
        if from.is_some() {
            sql.push_str(" AND snapshot_on >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND snapshot_on <= ?");
        }
        sql.push_str(" ORDER BY snapshot_on DESC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, SnapshotRow>(&sql).bind(owner_id);
        if let Some(from) = from {
            query = query.bind(from.to_string());
        }
        if let Some(to) = to {
            query = query.bind(to.to_string());
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(SnapshotRow::into_snapshot).collect()
    }

    pub async fn update_backend_id(
        &self,
        owner_id: &str,
        id: Uuid,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE activity_snapshots SET backend_id = ?, sync_status = 'synced', updated_at = ?
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
            "UPDATE activity_snapshots SET sync_status = ?, updated_at = ?
             WHERE id = ? AND owner_id = ?",
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

    pub async fn delete_all(&self, owner_id: &str) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM activity_snapshots WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_all(&mut *tx)
                .await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM activity_snapshots WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    pub async fn remove_duplicates(&self, owner_id: &str) -> Result<usize, StoreError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM activity_snapshots WHERE owner_id = ? ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = Vec::new();
        for row in rows {
            if !seen.insert(row.snapshot_on.clone()) {
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
            sqlx::query("DELETE FROM activity_snapshots WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(duplicates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, OutboxRepository, ProfileRepository};
    use tempfile::TempDir;

    struct TestContext {
        repo: ActivitySnapshotRepository,
        outbox: OutboxRepository,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        ProfileRepository::new(pool.clone())
            .ensure("user1", "User One")
            .await
            .unwrap();
        TestContext {
            repo: ActivitySnapshotRepository::new(pool.clone(), ChangeNotifier::new()),
            outbox: OutboxRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_reimport_growing_totals_updates_in_place() {
        let ctx = setup().await;

        let morning = ActivitySnapshot::new("user1", date()).with_steps(3000);
        let id = ctx.repo.save(&morning).await.unwrap();
        ctx.repo.update_backend_id("user1", id, "remote-1").await.unwrap();

        // Same day, higher totals: the row is corrected, not duplicated
        let evening = ActivitySnapshot::new("user1", date())
            .with_steps(11000)
            .with_exercise_minutes(35);
        assert_eq!(ctx.repo.save(&evening).await.unwrap(), id);

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.steps, 11000);
        assert!(stored.backend_id.is_none());
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_identical_reimport_is_noop() {
        let ctx = setup().await;

        let snap = ActivitySnapshot::new("user1", date()).with_steps(5000);
        ctx.repo.save(&snap).await.unwrap();
        let again = ActivitySnapshot::new("user1", date()).with_steps(5000);
        ctx.repo.save(&again).await.unwrap();

        assert_eq!(ctx.outbox.fetch_pending_events(None, None).await.unwrap().len(), 1);
        assert_eq!(ctx.repo.list("user1", None, None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first() {
        let ctx = setup().await;

        for day in 1..=3 {
            let snap = ActivitySnapshot::new(
                "user1",
                NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            )
            .with_steps(day as i64 * 1000);
            ctx.repo.save(&snap).await.unwrap();
        }

        let all = ctx.repo.list("user1", None, None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].snapshot_on, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_cleans_events() {
        let ctx = setup().await;

        ctx.repo
            .save(&ActivitySnapshot::new("user1", date()).with_steps(100))
            .await
            .unwrap();
        assert_eq!(ctx.repo.delete_all("user1").await.unwrap(), 1);
        assert!(ctx.outbox.fetch_pending_events(None, None).await.unwrap().is_empty());
    }
}
