use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity_kind::EntityKind;

/// Default retry budget for a sync intent.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// Queue state of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            _ => Err(format!("Unknown event status '{}'", s)),
        }
    }
}

/// A durable intent to deliver one local record to the backend.
///
/// Written in the same transaction as the entity it references, so a crash
/// can never lose a write that has no matching sync intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: EntityKind,
    pub entity_id: Uuid,
    pub owner_id: String,
    pub status: EventStatus,
    /// True for a create, false for a correcting update.
    pub is_new_record: bool,
    /// Denormalized JSON snapshot of the fields needed to build the remote
    /// request without re-reading the entity.
    pub metadata: String,
    pub priority: i64,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl OutboxEvent {
    pub fn new(
        event_type: EntityKind,
        entity_id: Uuid,
        owner_id: impl Into<String>,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            entity_id,
            owner_id: owner_id.into(),
            status: EventStatus::Pending,
            is_new_record: true,
            metadata: metadata.into(),
            priority: 0,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Whether a failed event is still eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Terminal failure: retries exhausted, needs manual reset.
    pub fn is_terminal(&self) -> bool {
        self.status == EventStatus::Failed && !self.is_retryable()
    }
}

impl fmt::Display for OutboxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} attempt {}/{}",
            self.event_type, self.entity_id, self.status, self.attempt_count, self.max_attempts
        )
    }
}

/// Aggregate queue counters, surfaced by `lume sync status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboxStatistics {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub stale: i64,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub newest_completed: Option<DateTime<Utc>>,
}
