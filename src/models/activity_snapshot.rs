use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity_kind::SyncStatus;

/// Daily activity totals imported from the device's health store.
///
/// Natural key: owner + snapshot_on. A day is re-imported whenever the
/// device reports new totals, so corrections are the common case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub id: Uuid,
    pub owner_id: String,
    pub snapshot_on: NaiveDate,
    pub steps: i64,
    pub active_energy: f64,
    pub exercise_minutes: i64,
    pub stand_hours: i64,
    pub backend_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivitySnapshot {
    pub fn new(owner_id: impl Into<String>, snapshot_on: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            snapshot_on,
            steps: 0,
            active_energy: 0.0,
            exercise_minutes: 0,
            stand_hours: 0,
            backend_id: None,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_steps(mut self, steps: i64) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_active_energy(mut self, kcal: f64) -> Self {
        self.active_energy = kcal;
        self
    }

    pub fn with_exercise_minutes(mut self, minutes: i64) -> Self {
        self.exercise_minutes = minutes;
        self
    }

    pub fn with_stand_hours(mut self, hours: i64) -> Self {
        self.stand_hours = hours;
        self
    }

    pub fn differs_from(&self, other: &ActivitySnapshot) -> bool {
        self.steps != other.steps
            || (self.active_energy - other.active_energy).abs() > 0.5
            || self.exercise_minutes != other.exercise_minutes
            || self.stand_hours != other.stand_hours
    }
}

impl fmt::Display for ActivitySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} steps, {:.0} kcal, {} min exercise, {} stand hours",
            self.snapshot_on, self.steps, self.active_energy, self.exercise_minutes, self.stand_hours
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_new_snapshot_zeroed() {
        let snap = ActivitySnapshot::new("user1", date());
        assert_eq!(snap.steps, 0);
        assert_eq!(snap.active_energy, 0.0);
        assert_eq!(snap.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_differs_from() {
        let a = ActivitySnapshot::new("user1", date())
            .with_steps(8000)
            .with_active_energy(400.0);
        let same = ActivitySnapshot::new("user1", date())
            .with_steps(8000)
            .with_active_energy(400.0);
        let more_steps = ActivitySnapshot::new("user1", date())
            .with_steps(9500)
            .with_active_energy(400.0);

        assert!(!a.differs_from(&same));
        assert!(a.differs_from(&more_steps));
    }

    #[test]
    fn test_display() {
        let snap = ActivitySnapshot::new("user1", date())
            .with_steps(10234)
            .with_exercise_minutes(42);
        let out = format!("{}", snap);
        assert!(out.contains("10234 steps"));
        assert!(out.contains("42 min"));
    }
}
