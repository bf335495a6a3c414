use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of entity types the sync engine knows how to deliver.
///
/// The string tag doubles as the outbox `event_type` column and as the
/// remote resource path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProgressEntry,
    Workout,
    MealLog,
    ActivitySnapshot,
    WorkoutTemplate,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::ProgressEntry,
        EntityKind::Workout,
        EntityKind::MealLog,
        EntityKind::ActivitySnapshot,
        EntityKind::WorkoutTemplate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ProgressEntry => "progress_entry",
            EntityKind::Workout => "workout",
            EntityKind::MealLog => "meal_log",
            EntityKind::ActivitySnapshot => "activity_snapshot",
            EntityKind::WorkoutTemplate => "workout_template",
        }
    }

    /// Remote collection name used in `POST /v1/<resource>`.
    pub fn resource(&self) -> &'static str {
        match self {
            EntityKind::ProgressEntry => "progress-entries",
            EntityKind::Workout => "workouts",
            EntityKind::MealLog => "meal-logs",
            EntityKind::ActivitySnapshot => "activity-snapshots",
            EntityKind::WorkoutTemplate => "workout-templates",
        }
    }

    /// Entity table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::ProgressEntry => "progress_entries",
            EntityKind::Workout => "workouts",
            EntityKind::MealLog => "meal_logs",
            EntityKind::ActivitySnapshot => "activity_snapshots",
            EntityKind::WorkoutTemplate => "workout_templates",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress_entry" => Ok(EntityKind::ProgressEntry),
            "workout" => Ok(EntityKind::Workout),
            "meal_log" => Ok(EntityKind::MealLog),
            "activity_snapshot" => Ok(EntityKind::ActivitySnapshot),
            "workout_template" => Ok(EntityKind::WorkoutTemplate),
            _ => Err(format!("Unknown entity kind '{}'", s)),
        }
    }
}

/// Local sync state of a domain entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("Unknown sync status '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_entity_kind_unknown() {
        assert!(EntityKind::from_str("note").is_err());
    }

    #[test]
    fn test_entity_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&EntityKind::MealLog).unwrap();
        assert_eq!(json, "\"meal_log\"");
    }

    #[test]
    fn test_sync_status_round_trip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Failed,
        ] {
            assert_eq!(SyncStatus::from_str(status.as_str()).unwrap(), status);
        }
    }
}
