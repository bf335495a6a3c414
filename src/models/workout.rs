use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity_kind::SyncStatus;

/// A completed workout session.
///
/// Natural key: owner + external_source_id when the workout was imported
/// from a device (the import id is stable across re-imports), otherwise
/// owner + activity + started_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub activity: String,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub calories: Option<f64>,
    /// Stable id assigned by the originating device/platform, if imported.
    pub external_source_id: Option<String>,
    pub note: Option<String>,
    pub backend_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkoutEntry {
    pub fn new(
        owner_id: impl Into<String>,
        activity: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            activity: activity.into(),
            started_at,
            duration_minutes,
            calories: None,
            external_source_id: None,
            note: None,
            backend_id: None,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_calories(mut self, calories: f64) -> Self {
        self.calories = Some(calories);
        self
    }

    pub fn with_external_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.external_source_id = Some(source_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether the stored row needs correcting to match a re-submission.
    pub fn differs_from(&self, duration_minutes: i64, calories: Option<f64>) -> bool {
        if self.duration_minutes != duration_minutes {
            return true;
        }
        match (self.calories, calories) {
            (Some(a), Some(b)) => (a - b).abs() > 0.5,
            (None, None) => false,
            _ => true,
        }
    }
}

impl fmt::Display for WorkoutEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} min",
            self.started_at.format("%Y-%m-%d %H:%M"),
            self.activity,
            self.duration_minutes
        )?;
        if let Some(cal) = self.calories {
            write!(f, ", {:.0} kcal", cal)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workout() {
        let workout = WorkoutEntry::new("user1", "running", Utc::now(), 30);

        assert_eq!(workout.activity, "running");
        assert_eq!(workout.duration_minutes, 30);
        assert!(workout.external_source_id.is_none());
        assert_eq!(workout.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_differs_from() {
        let workout = WorkoutEntry::new("user1", "running", Utc::now(), 30).with_calories(250.0);

        assert!(!workout.differs_from(30, Some(250.0)));
        assert!(!workout.differs_from(30, Some(250.4)));
        assert!(workout.differs_from(35, Some(250.0)));
        assert!(workout.differs_from(30, Some(300.0)));
        assert!(workout.differs_from(30, None));
    }

    #[test]
    fn test_display_includes_calories() {
        let workout = WorkoutEntry::new("user1", "cycling", Utc::now(), 45).with_calories(412.0);
        let out = format!("{}", workout);
        assert!(out.contains("cycling"));
        assert!(out.contains("45 min"));
        assert!(out.contains("412 kcal"));
    }
}
