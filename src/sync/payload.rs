//! Denormalized event payloads.
//!
//! A snapshot of the fields needed to build the remote request is frozen
//! into the outbox event at enqueue time, so the processor never has to
//! re-read (or race with) the entity. The same structs validate the
//! metadata when the handler dispatches the event.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ActivitySnapshot, MealItem, MealLog, MealType, ProgressEntry, ProgressMetric,
    TemplateExercise, WorkoutEntry, WorkoutTemplate,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub client_id: Uuid,
    pub owner_id: String,
    pub metric: ProgressMetric,
    pub quantity: f64,
    pub unit: String,
    pub recorded_on: NaiveDate,
    pub recorded_at: Option<NaiveTime>,
    pub note: Option<String>,
}

impl From<&ProgressEntry> for ProgressPayload {
    fn from(entry: &ProgressEntry) -> Self {
        Self {
            client_id: entry.id,
            owner_id: entry.owner_id.clone(),
            metric: entry.metric,
            quantity: entry.quantity,
            unit: entry.unit.clone(),
            recorded_on: entry.recorded_on,
            recorded_at: entry.recorded_at,
            note: entry.note.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutPayload {
    pub client_id: Uuid,
    pub owner_id: String,
    pub activity: String,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub calories: Option<f64>,
    pub external_source_id: Option<String>,
    pub note: Option<String>,
}

impl From<&WorkoutEntry> for WorkoutPayload {
    fn from(workout: &WorkoutEntry) -> Self {
        Self {
            client_id: workout.id,
            owner_id: workout.owner_id.clone(),
            activity: workout.activity.clone(),
            started_at: workout.started_at,
            duration_minutes: workout.duration_minutes,
            calories: workout.calories,
            external_source_id: workout.external_source_id.clone(),
            note: workout.note.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealLogPayload {
    pub client_id: Uuid,
    pub owner_id: String,
    pub meal_type: MealType,
    pub logged_on: NaiveDate,
    pub notes: Option<String>,
    pub items: Vec<MealItem>,
}

impl From<&MealLog> for MealLogPayload {
    fn from(log: &MealLog) -> Self {
        Self {
            client_id: log.id,
            owner_id: log.owner_id.clone(),
            meal_type: log.meal_type,
            logged_on: log.logged_on,
            notes: log.notes.clone(),
            items: log.items.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub client_id: Uuid,
    pub owner_id: String,
    pub snapshot_on: NaiveDate,
    pub steps: i64,
    pub active_energy: f64,
    pub exercise_minutes: i64,
    pub stand_hours: i64,
}

impl From<&ActivitySnapshot> for SnapshotPayload {
    fn from(snapshot: &ActivitySnapshot) -> Self {
        Self {
            client_id: snapshot.id,
            owner_id: snapshot.owner_id.clone(),
            snapshot_on: snapshot.snapshot_on,
            steps: snapshot.steps,
            active_energy: snapshot.active_energy,
            exercise_minutes: snapshot.exercise_minutes,
            stand_hours: snapshot.stand_hours,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatePayload {
    pub client_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub exercises: Vec<TemplateExercise>,
}

impl From<&WorkoutTemplate> for TemplatePayload {
    fn from(template: &WorkoutTemplate) -> Self {
        Self {
            client_id: template.id,
            owner_id: template.owner_id.clone(),
            name: template.name.clone(),
            notes: template.notes.clone(),
            exercises: template.exercises.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_payload_snapshot() {
        let entry = ProgressEntry::new(
            "user1",
            ProgressMetric::Weight,
            70.0,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .with_note("morning");

        let payload = ProgressPayload::from(&entry);
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: ProgressPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.client_id, entry.id);
        assert_eq!(parsed.quantity, 70.0);
        assert_eq!(parsed.note.as_deref(), Some("morning"));
    }

    #[test]
    fn test_meal_payload_keeps_items() {
        let log = MealLog::new(
            "user1",
            MealType::Dinner,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .with_items(vec![MealItem::new("pasta", 200.0, "g").with_calories(350.0)]);

        let payload = MealLogPayload::from(&log);
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: MealLogPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name, "pasta");
    }

    #[test]
    fn test_payload_rejects_wrong_shape() {
        let result: Result<ProgressPayload, _> = serde_json::from_str(r#"{"steps": 1000}"#);
        assert!(result.is_err());
    }
}
