mod meal_repo;
mod outbox_repo;
mod profile_repo;
mod progress_repo;
mod snapshot_repo;
mod template_repo;
mod workout_repo;

pub use meal_repo::MealLogRepository;
pub use outbox_repo::{NewOutboxEvent, OutboxRepository};
pub use profile_repo::ProfileRepository;
pub use progress_repo::{ProgressEntryRepository, ProgressFilter};
pub use snapshot_repo::ActivitySnapshotRepository;
pub use template_repo::WorkoutTemplateRepository;
pub use workout_repo::WorkoutRepository;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced synchronously by local reads and writes.
///
/// Remote failures never appear here - they are recorded on outbox events
/// and only observable through the queue status and statistics.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The owner reference does not resolve to a local profile.
    #[error("Unknown owner '{0}'. Create the profile first.")]
    InvalidOwner(String),
    /// A referenced entity id is missing at update time.
    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),
    /// A referenced outbox event id is missing at update time.
    #[error("Outbox event not found: {0}")]
    EventNotFound(Uuid),
    /// Underlying storage I/O error.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
    /// Event metadata could not be serialized or parsed.
    #[error("Event metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    /// A stored column does not parse back into its domain type.
    #[error("Corrupt row data: {0}")]
    Corrupt(String),
}

/// Initialize the database connection pool and run migrations.
pub async fn init_db(db_path: Option<PathBuf>) -> Result<SqlitePool, sqlx::Error> {
    let path = db_path.expect("database_path must be provided");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Resolves an owner id against the profiles table inside a transaction.
pub(crate) async fn ensure_owner(
    conn: &mut SqliteConnection,
    owner_id: &str,
) -> Result<(), StoreError> {
    let found: Option<(String,)> = sqlx::query_as("SELECT owner_id FROM profiles WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(conn)
        .await?;

    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::InvalidOwner(owner_id.to_string())),
    }
}

// Column parsing helpers shared by the repositories. Timestamps are stored
// as RFC 3339 TEXT, dates as ISO dates, ids as UUID strings.

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("uuid '{}': {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_opt_timestamp(
    value: &Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(|v| parse_timestamp(v)).transpose()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("date '{}': {}", value, e)))
}

pub(crate) fn parse_opt_time(value: &Option<String>) -> Result<Option<NaiveTime>, StoreError> {
    value
        .as_deref()
        .map(|v| {
            NaiveTime::parse_from_str(v, "%H:%M:%S")
                .map_err(|e| StoreError::Corrupt(format!("time '{}': {}", v, e)))
        })
        .transpose()
}
