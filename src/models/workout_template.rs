use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity_kind::SyncStatus;

/// One exercise slot in a workout template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateExercise {
    pub name: String,
    pub sets: i64,
    pub reps: i64,
    pub position: i64,
}

impl TemplateExercise {
    pub fn new(name: impl Into<String>, sets: i64, reps: i64, position: i64) -> Self {
        Self {
            name: name.into(),
            sets,
            reps,
            position,
        }
    }
}

/// A reusable workout plan.
///
/// Natural key: owner + name (case-insensitive). Saving a template under
/// an existing name replaces its exercise list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub exercises: Vec<TemplateExercise>,
    pub backend_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkoutTemplate {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            notes: None,
            exercises: Vec::new(),
            backend_id: None,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_exercises(mut self, exercises: Vec<TemplateExercise>) -> Self {
        self.exercises = exercises;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn differs_from(&self, exercises: &[TemplateExercise], notes: Option<&str>) -> bool {
        self.exercises != exercises || self.notes.as_deref() != notes
    }
}

impl fmt::Display for WorkoutTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        for exercise in &self.exercises {
            writeln!(
                f,
                "  {}. {} {}x{}",
                exercise.position, exercise.name, exercise.sets, exercise.reps
            )?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "  notes: {}", notes)?;
        }
        Ok(())
    }
}
