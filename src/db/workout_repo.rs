//! Workout repository.
//!
//! Dedup key is owner + external_source_id for device-imported workouts
//! (the import id is stable across re-imports), falling back to
//! owner + activity + start time for manual entries.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{EntityKind, SyncStatus, WorkoutEntry};
use crate::sync::{ChangeNotifier, WorkoutPayload};

use super::outbox_repo::{insert_event, NewOutboxEvent};
use super::{ensure_owner, parse_timestamp, parse_uuid, StoreError};

#[derive(sqlx::FromRow)]
struct WorkoutRow {
    id: String,
    owner_id: String,
    activity: String,
    started_at: String,
    duration_minutes: i64,
    calories: Option<f64>,
    external_source_id: Option<String>,
    note: Option<String>,
    backend_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

impl WorkoutRow {
    fn into_workout(self) -> Result<WorkoutEntry, StoreError> {
        Ok(WorkoutEntry {
            id: parse_uuid(&self.id)?,
            owner_id: self.owner_id,
            activity: self.activity,
            started_at: parse_timestamp(&self.started_at)?,
            duration_minutes: self.duration_minutes,
            calories: self.calories,
            external_source_id: self.external_source_id,
            note: self.note,
            backend_id: self.backend_id,
            sync_status: SyncStatus::from_str(&self.sync_status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub struct WorkoutRepository {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl WorkoutRepository {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    pub async fn save(&self, workout: &WorkoutEntry) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_owner(&mut tx, &workout.owner_id).await?;

        let existing: Option<WorkoutRow> = match &workout.external_source_id {
            Some(source_id) => {
                sqlx::query_as(
                    "SELECT * FROM workouts WHERE owner_id = ? AND external_source_id = ?",
                )
                .bind(&workout.owner_id)
                .bind(source_id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM workouts
                     WHERE owner_id = ? AND external_source_id IS NULL
                       AND activity = ? AND started_at = ?",
                )
                .bind(&workout.owner_id)
                .bind(&workout.activity)
                .bind(workout.started_at.to_rfc3339())
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        match existing {
            Some(row) => {
                let current = row.into_workout()?;
                if !current.differs_from(workout.duration_minutes, workout.calories) {
                    tracing::debug!(id = %current.id, "duplicate workout ignored");
                    return Ok(current.id);
                }

                sqlx::query(
                    "UPDATE workouts
                     SET duration_minutes = ?, calories = ?, note = ?, backend_id = NULL,
                         sync_status = 'pending', updated_at = ?
                     WHERE id = ?",
                )
                .bind(workout.duration_minutes)
                .bind(workout.calories)
                .bind(&workout.note)
                .bind(Utc::now().to_rfc3339())
                .bind(current.id.to_string())
                .execute(&mut *tx)
                .await?;

                let mut corrected = current.clone();
                corrected.duration_minutes = workout.duration_minutes;
                corrected.calories = workout.calories;
                corrected.note = workout.note.clone();

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::Workout,
                        entity_id: current.id,
                        owner_id: current.owner_id.clone(),
                        is_new_record: false,
                        metadata: serde_json::to_string(&WorkoutPayload::from(&corrected))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(current.id, &current.owner_id, EntityKind::Workout, false);
                Ok(current.id)
            }
            None => {
                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    r#"
                    INSERT INTO workouts
                        (id, owner_id, activity, started_at, duration_minutes, calories,
                         external_source_id, note, backend_id, sync_status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 'pending', ?, ?)
                    "#,
                )
                .bind(workout.id.to_string())
                .bind(&workout.owner_id)
                .bind(&workout.activity)
                .bind(workout.started_at.to_rfc3339())
                .bind(workout.duration_minutes)
                .bind(workout.calories)
                .bind(&workout.external_source_id)
                .bind(&workout.note)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::Workout,
                        entity_id: workout.id,
                        owner_id: workout.owner_id.clone(),
                        is_new_record: true,
                        metadata: serde_json::to_string(&WorkoutPayload::from(workout))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(workout.id, &workout.owner_id, EntityKind::Workout, true);
                Ok(workout.id)
            }
        }
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<WorkoutEntry>, StoreError> {
        let row: Option<WorkoutRow> =
            sqlx::query_as("SELECT * FROM workouts WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WorkoutRow::into_workout).transpose()
    }

    /// Most recent first, optionally bounded to a start-time window.
    pub async fn list(
        &self,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<WorkoutEntry>, StoreError> {
        let mut sql = String::from("SELECT * FROM workouts WHERE owner_id = ?");
        if since.is_some() {
            sql.push_str(" AND started_at >= ?");
        }
        sql.push_str(" ORDER BY started_at DESC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, WorkoutRow>(&sql).bind(owner_id);
        if let Some(since) = since {
            query = query.bind(since.to_rfc3339());
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(WorkoutRow::into_workout).collect()
    }

    pub async fn update_backend_id(
        &self,
        owner_id: &str,
        id: Uuid,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE workouts SET backend_id = ?, sync_status = 'synced', updated_at = ?
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
            "UPDATE workouts SET sync_status = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
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

        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM workouts WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_all(&mut *tx)
            .await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workouts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    pub async fn remove_duplicates(&self, owner_id: &str) -> Result<usize, StoreError> {
        let rows: Vec<WorkoutRow> =
            sqlx::query_as("SELECT * FROM workouts WHERE owner_id = ? ORDER BY created_at ASC")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = Vec::new();
        for row in rows {
            let key = match &row.external_source_id {
                Some(source_id) => format!("src:{}", source_id),
                None => format!("manual:{}:{}", row.activity, row.started_at),
            };
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
            sqlx::query("DELETE FROM workouts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(duplicates.len())
    }
}
