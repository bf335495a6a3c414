//! Meal log repository.
//!
//! Meal logs carry line items in a child table; a corrected save replaces
//! the whole item list, following the same transaction + outbox enqueue
//! discipline as the scalar repositories.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{EntityKind, MealItem, MealLog, MealType, SyncStatus};
use crate::sync::{ChangeNotifier, MealLogPayload};

use super::outbox_repo::{insert_event, NewOutboxEvent};
use super::{ensure_owner, parse_date, parse_timestamp, parse_uuid, StoreError};

#[derive(sqlx::FromRow)]
struct MealLogRow {
    id: String,
    owner_id: String,
    meal_type: String,
    logged_on: String,
    notes: Option<String>,
    backend_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct MealItemRow {
    name: String,
    quantity: f64,
    unit: String,
    calories: Option<f64>,
}

impl MealLogRow {
    fn into_log(self, items: Vec<MealItem>) -> Result<MealLog, StoreError> {
        Ok(MealLog {
            id: parse_uuid(&self.id)?,
            owner_id: self.owner_id,
            meal_type: MealType::from_str(&self.meal_type).map_err(StoreError::Corrupt)?,
            logged_on: parse_date(&self.logged_on)?,
            notes: self.notes,
            items,
            backend_id: self.backend_id,
            sync_status: SyncStatus::from_str(&self.sync_status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    log_id: &str,
) -> Result<Vec<MealItem>, StoreError> {
    let rows: Vec<MealItemRow> = sqlx::query_as(
        "SELECT name, quantity, unit, calories FROM meal_items WHERE meal_log_id = ? ORDER BY rowid",
    )
    .bind(log_id)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| MealItem {
            name: row.name,
            quantity: row.quantity,
            unit: row.unit,
            calories: row.calories,
        })
        .collect())
}

async fn insert_items(
    conn: &mut SqliteConnection,
    log_id: &str,
    items: &[MealItem],
) -> Result<(), StoreError> {
    for item in items {
        sqlx::query(
            "INSERT INTO meal_items (meal_log_id, name, quantity, unit, calories) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(log_id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.calories)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub struct MealLogRepository {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl MealLogRepository {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Saves a meal log, deduplicating on owner + meal type + date.
    pub async fn save(&self, log: &MealLog) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_owner(&mut tx, &log.owner_id).await?;

        let existing: Option<MealLogRow> = sqlx::query_as(
            "SELECT * FROM meal_logs WHERE owner_id = ? AND meal_type = ? AND logged_on = ?",
        )
        .bind(&log.owner_id)
        .bind(log.meal_type.as_str())
        .bind(log.logged_on.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let row_id = row.id.clone();
                let items = fetch_items(&mut tx, &row_id).await?;
                let current = row.into_log(items)?;

                if !current.differs_from(&log.items, log.notes.as_deref()) {
                    tracing::debug!(id = %current.id, "duplicate meal log ignored");
                    return Ok(current.id);
                }

                sqlx::query(
                    "UPDATE meal_logs
                     SET notes = ?, backend_id = NULL, sync_status = 'pending', updated_at = ?
                     WHERE id = ?",
                )
                .bind(&log.notes)
                .bind(Utc::now().to_rfc3339())
                .bind(&row_id)
                .execute(&mut *tx)
                .await?;

                // Replace the item list
                sqlx::query("DELETE FROM meal_items WHERE meal_log_id = ?")
                    .bind(&row_id)
                    .execute(&mut *tx)
                    .await?;
                insert_items(&mut tx, &row_id, &log.items).await?;

                let mut corrected = current.clone();
                corrected.notes = log.notes.clone();
                corrected.items = log.items.clone();

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::MealLog,
                        entity_id: current.id,
                        owner_id: current.owner_id.clone(),
                        is_new_record: false,
                        metadata: serde_json::to_string(&MealLogPayload::from(&corrected))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(current.id, &current.owner_id, EntityKind::MealLog, false);
                Ok(current.id)
            }
            None => {
                let now = Utc::now().to_rfc3339();
                let id_str = log.id.to_string();
                sqlx::query(
                    r#"
                    INSERT INTO meal_logs
                        (id, owner_id, meal_type, logged_on, notes, backend_id,
                         sync_status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, NULL, 'pending', ?, ?)
                    "#,
                )
                .bind(&id_str)
                .bind(&log.owner_id)
                .bind(log.meal_type.as_str())
                .bind(log.logged_on.to_string())
                .bind(&log.notes)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                insert_items(&mut tx, &id_str, &log.items).await?;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::MealLog,
                        entity_id: log.id,
                        owner_id: log.owner_id.clone(),
                        is_new_record: true,
                        metadata: serde_json::to_string(&MealLogPayload::from(log))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier
                    .publish(log.id, &log.owner_id, EntityKind::MealLog, true);
                Ok(log.id)
            }
        }
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<MealLog>, StoreError> {
        let row: Option<MealLogRow> =
            sqlx::query_as("SELECT * FROM meal_logs WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let mut conn = self.pool.acquire().await?;
                let items = fetch_items(&mut conn, &row.id).await?;
                row.into_log(items).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Most recent day first; optionally constrained to a date range.
    pub async fn list(
        &self,
        owner_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<MealLog>, StoreError> {
        let mut sql = String::from("SELECT * FROM meal_logs WHERE owner_id = ?");
        if from.is_some() {
            sql.push_str(" AND logged_on >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND logged_on <= ?");
        }
        sql.push_str(" ORDER BY logged_on DESC, created_at DESC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, MealLogRow>(&sql).bind(owner_id);
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
        let mut conn = self.pool.acquire().await?;
        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let items = fetch_items(&mut conn, &row.id).await?;
            logs.push(row.into_log(items)?);
        }
        Ok(logs)
    }

    pub async fn update_backend_id(
        &self,
        owner_id: &str,
        id: Uuid,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE meal_logs SET backend_id = ?, sync_status = 'synced', updated_at = ?
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
            "UPDATE meal_logs SET sync_status = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
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

        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM meal_logs WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_all(&mut *tx)
            .await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM meal_items WHERE meal_log_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM meal_logs WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    pub async fn remove_duplicates(&self, owner_id: &str) -> Result<usize, StoreError> {
        let rows: Vec<MealLogRow> =
            sqlx::query_as("SELECT * FROM meal_logs WHERE owner_id = ? ORDER BY created_at ASC")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut duplicates = Vec::new();
        for row in rows {
            if !seen.insert((row.meal_type.clone(), row.logged_on.clone())) {
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
            sqlx::query("DELETE FROM meal_items WHERE meal_log_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM meal_logs WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(duplicates.len())
    }
}
