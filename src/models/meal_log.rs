use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity_kind::SyncStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            _ => Err(format!(
                "Invalid meal type '{}'. Valid options: breakfast, lunch, dinner, snack",
                s
            )),
        }
    }
}

/// One food line item inside a meal log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub calories: Option<f64>,
}

impl MealItem {
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            calories: None,
        }
    }

    pub fn with_calories(mut self, calories: f64) -> Self {
        self.calories = Some(calories);
        self
    }
}

/// What was actually eaten at one meal on one day.
///
/// Natural key: owner + meal_type + logged_on. Re-logging the same meal
/// with different items corrects the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealLog {
    pub id: Uuid,
    pub owner_id: String,
    pub meal_type: MealType,
    pub logged_on: NaiveDate,
    pub notes: Option<String>,
    pub items: Vec<MealItem>,
    pub backend_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MealLog {
    pub fn new(owner_id: impl Into<String>, meal_type: MealType, logged_on: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            meal_type,
            logged_on,
            notes: None,
            items: Vec::new(),
            backend_id: None,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_items(mut self, items: Vec<MealItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn total_calories(&self) -> f64 {
        self.items.iter().filter_map(|i| i.calories).sum()
    }

    /// Whether a re-submission with these items/notes is a correction.
    pub fn differs_from(&self, items: &[MealItem], notes: Option<&str>) -> bool {
        self.items != items || self.notes.as_deref() != notes
    }
}

impl fmt::Display for MealLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.logged_on, self.meal_type)?;
        for item in &self.items {
            write!(f, "  - {} {} {}", item.quantity, item.unit, item.name)?;
            if let Some(cal) = item.calories {
                write!(f, " ({:.0} kcal)", cal)?;
            }
            writeln!(f)?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "  notes: {}", notes)?;
        }
        Ok(())
    }
}
