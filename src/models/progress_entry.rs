use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity_kind::SyncStatus;

/// Quantities two progress entries may differ by and still count as the
/// same measurement. Differences beyond this trigger an update + re-sync.
pub const QUANTITY_EPSILON: f64 = 0.001;

/// Kind of measurement a progress entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMetric {
    Weight,
    BodyFat,
    WaistCircumference,
    RestingHeartRate,
    SleepHours,
}

impl ProgressMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressMetric::Weight => "weight",
            ProgressMetric::BodyFat => "body_fat",
            ProgressMetric::WaistCircumference => "waist_circumference",
            ProgressMetric::RestingHeartRate => "resting_heart_rate",
            ProgressMetric::SleepHours => "sleep_hours",
        }
    }

    /// Default display unit for the metric.
    pub fn default_unit(&self) -> &'static str {
        match self {
            ProgressMetric::Weight => "kg",
            ProgressMetric::BodyFat => "%",
            ProgressMetric::WaistCircumference => "cm",
            ProgressMetric::RestingHeartRate => "bpm",
            ProgressMetric::SleepHours => "h",
        }
    }
}

impl fmt::Display for ProgressMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProgressMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weight" => Ok(ProgressMetric::Weight),
            "body_fat" => Ok(ProgressMetric::BodyFat),
            "waist_circumference" => Ok(ProgressMetric::WaistCircumference),
            "resting_heart_rate" => Ok(ProgressMetric::RestingHeartRate),
            "sleep_hours" => Ok(ProgressMetric::SleepHours),
            _ => Err(format!(
                "Invalid metric '{}'. Valid options: weight, body_fat, waist_circumference, \
                 resting_heart_rate, sleep_hours",
                s
            )),
        }
    }
}

/// A single measured value for one owner on one date (optionally one time).
///
/// Natural key: owner + metric + recorded_on (+ recorded_at when present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub metric: ProgressMetric,
    pub quantity: f64,
    pub unit: String,
    pub recorded_on: NaiveDate,
    pub recorded_at: Option<NaiveTime>,
    pub note: Option<String>,
    pub backend_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(
        owner_id: impl Into<String>,
        metric: ProgressMetric,
        quantity: f64,
        recorded_on: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            metric,
            quantity,
            unit: metric.default_unit().to_string(),
            recorded_on,
            recorded_at: None,
            note: None,
            backend_id: None,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.recorded_at = Some(time);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether `other` would be a meaningful correction of this entry.
    pub fn differs_from(&self, quantity: f64) -> bool {
        (self.quantity - quantity).abs() > QUANTITY_EPSILON
    }
}

impl fmt::Display for ProgressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.recorded_on, self.metric, self.quantity, self.unit
        )?;
        if let Some(note) = &self.note {
            write!(f, " ({})", note)?;
        }
        Ok(())
    }
}
