//! Workout template repository.
//!
//! Templates are deduplicated on owner + name (case-insensitive). Saving
//! under an existing name replaces the exercise list, which lives in the
//! template_exercises child table.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{EntityKind, SyncStatus, TemplateExercise, WorkoutTemplate};
use crate::sync::{ChangeNotifier, TemplatePayload};

use super::outbox_repo::{insert_event, NewOutboxEvent};
use super::{ensure_owner, parse_timestamp, parse_uuid, StoreError};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    owner_id: String,
    name: String,
    notes: Option<String>,
    backend_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

impl TemplateRow {
    fn into_template(self, exercises: Vec<TemplateExercise>) -> Result<WorkoutTemplate, StoreError> {
        Ok(WorkoutTemplate {
            id: parse_uuid(&self.id)?,
            owner_id: self.owner_id,
            name: self.name,
            notes: self.notes,
            exercises,
            backend_id: self.backend_id,
            sync_status: SyncStatus::from_str(&self.sync_status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExerciseRow {
    name: String,
    sets: i64,
    reps: i64,
    position: i64,
}

async fn fetch_exercises(
    conn: &mut SqliteConnection,
    template_id: &str,
) -> Result<Vec<TemplateExercise>, StoreError> {
    let rows: Vec<ExerciseRow> = sqlx::query_as(
        "SELECT name, sets, reps, position FROM template_exercises
         WHERE template_id = ? ORDER BY position ASC",
    )
    .bind(template_id)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TemplateExercise {
            name: row.name,
            sets: row.sets,
            reps: row.reps,
            position: row.position,
        })
        .collect())
}

async fn insert_exercises(
    conn: &mut SqliteConnection,
    template_id: &str,
    exercises: &[TemplateExercise],
) -> Result<(), StoreError> {
    for exercise in exercises {
        sqlx::query(
            "INSERT INTO template_exercises (template_id, name, sets, reps, position)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(&exercise.name)
        .bind(exercise.sets)
        .bind(exercise.reps)
        .bind(exercise.position)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub struct WorkoutTemplateRepository {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

impl WorkoutTemplateRepository {
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Saves a template, deduplicating on owner + name (case-insensitive).
    pub async fn save(&self, template: &WorkoutTemplate) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_owner(&mut tx, &template.owner_id).await?;

        let existing: Option<TemplateRow> = sqlx::query_as(
            "SELECT * FROM workout_templates WHERE owner_id = ? AND LOWER(name) = LOWER(?)",
        )
        .bind(&template.owner_id)
        .bind(&template.name)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let template_id = row.id.clone();
                let exercises = fetch_exercises(&mut tx, &template_id).await?;
                let current = row.into_template(exercises)?;

                if !current.differs_from(&template.exercises, template.notes.as_deref()) {
                    tracing::debug!(id = %current.id, name = %current.name, "unchanged template ignored");
                    return Ok(current.id);
                }

                sqlx::query("DELETE FROM template_exercises WHERE template_id = ?")
                    .bind(&template_id)
                    .execute(&mut *tx)
                    .await?;
                insert_exercises(&mut tx, &template_id, &template.exercises).await?;

                sqlx::query(
                    "UPDATE workout_templates
                     SET notes = ?, backend_id = NULL, sync_status = 'pending', updated_at = ?
                     WHERE id = ?",
                )
                .bind(&template.notes)
                .bind(Utc::now().to_rfc3339())
                .bind(&template_id)
                .execute(&mut *tx)
                .await?;

                let mut corrected = current.clone();
                corrected.exercises = template.exercises.clone();
                corrected.notes = template.notes.clone();

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::WorkoutTemplate,
                        entity_id: current.id,
                        owner_id: current.owner_id.clone(),
                        is_new_record: false,
                        metadata: serde_json::to_string(&TemplatePayload::from(&corrected))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier.publish(
                    current.id,
                    &current.owner_id,
                    EntityKind::WorkoutTemplate,
                    false,
                );
                Ok(current.id)
            }
            None => {
                let now = Utc::now().to_rfc3339();
                let template_id = template.id.to_string();
                sqlx::query(
                    r#"
                    INSERT INTO workout_templates
                        (id, owner_id, name, notes, backend_id, sync_status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, NULL, 'pending', ?, ?)
                    "#,
                )
                .bind(&template_id)
                .bind(&template.owner_id)
                .bind(&template.name)
                .bind(&template.notes)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                insert_exercises(&mut tx, &template_id, &template.exercises).await?;

                insert_event(
                    &mut tx,
                    &NewOutboxEvent {
                        event_type: EntityKind::WorkoutTemplate,
                        entity_id: template.id,
                        owner_id: template.owner_id.clone(),
                        is_new_record: true,
                        metadata: serde_json::to_string(&TemplatePayload::from(template))?,
                        priority: 0,
                    },
                )
                .await?;
                tx.commit().await?;

                self.notifier.publish(
                    template.id,
                    &template.owner_id,
                    EntityKind::WorkoutTemplate,
                    true,
                );
                Ok(template.id)
            }
        }
    }

    pub async fn get(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<WorkoutTemplate>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM workout_templates WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id)
                .fetch_optional(&mut *conn)
                .await?;

        match row {
            Some(row) => {
                let exercises = fetch_exercises(&mut conn, &row.id).await?;
                Ok(Some(row.into_template(exercises)?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<WorkoutTemplate>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT * FROM workout_templates WHERE owner_id = ? AND LOWER(name) = LOWER(?)",
        )
        .bind(owner_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let exercises = fetch_exercises(&mut conn, &row.id).await?;
                Ok(Some(row.into_template(exercises)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<WorkoutTemplate>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT * FROM workout_templates WHERE owner_id = ? ORDER BY LOWER(name) ASC",
        )
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let exercises = fetch_exercises(&mut conn, &row.id).await?;
            templates.push(row.into_template(exercises)?);
        }
        Ok(templates)
    }

    pub async fn update_backend_id(
        &self,
        owner_id: &str,
        id: Uuid,
        backend_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE workout_templates SET backend_id = ?, sync_status = 'synced', updated_at = ?
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
            "UPDATE workout_templates SET sync_status = ?, updated_at = ?
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
            sqlx::query_as("SELECT id FROM workout_templates WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_all(&mut *tx)
                .await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM outbox_events WHERE entity_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM template_exercises WHERE template_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workout_templates WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    pub async fn remove_duplicates(&self, owner_id: &str) -> Result<usize, StoreError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT * FROM workout_templates WHERE owner_id = ? ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = Vec::new();
        for row in rows {
            if !seen.insert(row.name.to_lowercase()) {
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
            sqlx::query("DELETE FROM template_exercises WHERE template_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workout_templates WHERE id = ?")
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
        repo: WorkoutTemplateRepository,
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
            repo: WorkoutTemplateRepository::new(pool.clone(), ChangeNotifier::new()),
            outbox: OutboxRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn push_day() -> Vec<TemplateExercise> {
        vec![
            TemplateExercise::new("bench press", 3, 5, 1),
            TemplateExercise::new("overhead press", 3, 8, 2),
        ]
    }

    #[tokio::test]
    async fn test_save_hydrates_exercises() {
        let ctx = setup().await;

        let template = WorkoutTemplate::new("user1", "Push Day").with_exercises(push_day());
        let id = ctx.repo.save(&template).await.unwrap();

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.exercises.len(), 2);
        assert_eq!(stored.exercises[0].name, "bench press");
        assert_eq!(stored.exercises[1].position, 2);
    }

    #[tokio::test]
    async fn test_name_dedup_is_case_insensitive() {
        let ctx = setup().await;

        let first = WorkoutTemplate::new("user1", "Push Day").with_exercises(push_day());
        let id = ctx.repo.save(&first).await.unwrap();

        let same = WorkoutTemplate::new("user1", "push day").with_exercises(push_day());
        assert_eq!(ctx.repo.save(&same).await.unwrap(), id);

        assert_eq!(ctx.repo.list("user1").await.unwrap().len(), 1);
        assert_eq!(ctx.outbox.fetch_pending_events(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_exercises_replace_and_resync() {
        let ctx = setup().await;

        let first = WorkoutTemplate::new("user1", "Push Day").with_exercises(push_day());
        let id = ctx.repo.save(&first).await.unwrap();
        ctx.repo.update_backend_id("user1", id, "remote-9").await.unwrap();

        let revised = WorkoutTemplate::new("user1", "Push Day").with_exercises(vec![
            TemplateExercise::new("incline bench", 4, 8, 1),
        ]);
        assert_eq!(ctx.repo.save(&revised).await.unwrap(), id);

        let stored = ctx.repo.get("user1", id).await.unwrap().unwrap();
        assert_eq!(stored.exercises.len(), 1);
        assert_eq!(stored.exercises[0].name, "incline bench");
        assert!(stored.backend_id.is_none());
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let events = ctx.outbox.fetch_pending_events(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| !e.is_new_record));
    }

    #[tokio::test]
    async fn test_get_by_name() {
        let ctx = setup().await;

        ctx.repo
            .save(&WorkoutTemplate::new("user1", "Legs").with_exercises(vec![
                TemplateExercise::new("squat", 5, 5, 1),
            ]))
            .await
            .unwrap();

        let found = ctx.repo.get_by_name("user1", "LEGS").await.unwrap();
        assert!(found.is_some());
        assert!(ctx.repo.get_by_name("user1", "Pull Day").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_all_cascades() {
        let ctx = setup().await;

        ctx.repo
            .save(&WorkoutTemplate::new("user1", "Push Day").with_exercises(push_day()))
            .await
            .unwrap();
        assert_eq!(ctx.repo.delete_all("user1").await.unwrap(), 1);
        assert!(ctx.repo.list("user1").await.unwrap().is_empty());
        assert!(ctx.outbox.fetch_pending_events(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_owner_rejected() {
        let ctx = setup().await;
        let result = ctx
            .repo
            .save(&WorkoutTemplate::new("ghost", "Push Day"))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidOwner(_))));
    }
}
