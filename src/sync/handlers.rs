//! Per-kind event handlers.
//!
//! Each handler validates the frozen event metadata against its payload
//! type before pushing it, so a corrupt or stale payload fails locally
//! instead of producing a malformed request.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{EntityKind, OutboxEvent};

use super::api::{RemoteBackend, RemoteError};
use super::payload::{
    MealLogPayload, ProgressPayload, SnapshotPayload, TemplatePayload, WorkoutPayload,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Payload { .. } => false,
            DispatchError::Remote(e) => e.is_transient(),
        }
    }
}

fn validate<P: DeserializeOwned + serde::Serialize>(
    kind: EntityKind,
    metadata: &str,
) -> Result<serde_json::Value, DispatchError> {
    let payload: P =
        serde_json::from_str(metadata).map_err(|source| DispatchError::Payload { kind, source })?;
    serde_json::to_value(&payload).map_err(|source| DispatchError::Payload { kind, source })
}

/// Pushes one event to the backend and returns the backend-assigned id.
///
/// The entity id doubles as the idempotency key, so re-delivery of the
/// same event is safe.
pub async fn dispatch(
    backend: &dyn RemoteBackend,
    event: &OutboxEvent,
) -> Result<String, DispatchError> {
    let kind = event.event_type;
    let payload = match kind {
        EntityKind::ProgressEntry => validate::<ProgressPayload>(kind, &event.metadata)?,
        EntityKind::Workout => validate::<WorkoutPayload>(kind, &event.metadata)?,
        EntityKind::MealLog => validate::<MealLogPayload>(kind, &event.metadata)?,
        EntityKind::ActivitySnapshot => validate::<SnapshotPayload>(kind, &event.metadata)?,
        EntityKind::WorkoutTemplate => validate::<TemplatePayload>(kind, &event.metadata)?,
    };

    let backend_id = backend
        .create_record(kind, &event.entity_id.to_string(), &payload)
        .await?;
    Ok(backend_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::models::{ProgressEntry, ProgressMetric};

    struct RecordingBackend {
        calls: Mutex<Vec<(EntityKind, String)>>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteBackend for RecordingBackend {
        async fn create_record(
            &self,
            kind: EntityKind,
            idempotency_key: &str,
            _payload: &serde_json::Value,
        ) -> Result<String, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((kind, idempotency_key.to_string()));
            Ok(format!("remote-{}", idempotency_key))
        }
    }

    fn progress_event() -> OutboxEvent {
        let entry = ProgressEntry::new(
            "user1",
            ProgressMetric::Weight,
            70.0,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        );
        let mut event = OutboxEvent::new(
            EntityKind::ProgressEntry,
            entry.id,
            "user1",
            serde_json::to_string(&ProgressPayload::from(&entry)).unwrap(),
        );
        event.is_new_record = true;
        event
    }

    #[tokio::test]
    async fn test_dispatch_uses_entity_id_as_idempotency_key() {
        let backend = RecordingBackend::new();
        let event = progress_event();

        let backend_id = dispatch(&backend, &event).await.unwrap();
        assert_eq!(backend_id, format!("remote-{}", event.entity_id));

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, EntityKind::ProgressEntry);
        assert_eq!(calls[0].1, event.entity_id.to_string());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_mismatched_payload() {
        let backend = RecordingBackend::new();
        let mut event = progress_event();
        // Snapshot-shaped metadata on a progress event fails validation
        event.metadata = r#"{"steps": 1000}"#.to_string();

        let result = dispatch(&backend, &event).await;
        assert!(matches!(result, Err(DispatchError::Payload { .. })));
        assert!(!result.unwrap_err().is_transient());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_handles_every_kind() {
        let backend = RecordingBackend::new();

        for kind in EntityKind::ALL {
            let metadata = match kind {
                EntityKind::ProgressEntry => serde_json::to_string(&ProgressPayload::from(
                    &ProgressEntry::new(
                        "user1",
                        ProgressMetric::Weight,
                        70.0,
                        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    ),
                ))
                .unwrap(),
                EntityKind::Workout => serde_json::to_string(&WorkoutPayload::from(
                    &crate::models::WorkoutEntry::new(
                        "user1",
                        "running",
                        chrono::Utc::now(),
                        30,
                    ),
                ))
                .unwrap(),
                EntityKind::MealLog => serde_json::to_string(&MealLogPayload::from(
                    &crate::models::MealLog::new(
                        "user1",
                        crate::models::MealType::Lunch,
                        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    ),
                ))
                .unwrap(),
                EntityKind::ActivitySnapshot => serde_json::to_string(&SnapshotPayload::from(
                    &crate::models::ActivitySnapshot::new(
                        "user1",
                        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    ),
                ))
                .unwrap(),
                EntityKind::WorkoutTemplate => serde_json::to_string(&TemplatePayload::from(
                    &crate::models::WorkoutTemplate::new("user1", "Push Day"),
                ))
                .unwrap(),
            };
            let event = OutboxEvent::new(kind, Uuid::new_v4(), "user1", metadata);
            dispatch(&backend, &event).await.unwrap();
        }

        assert_eq!(backend.calls.lock().unwrap().len(), EntityKind::ALL.len());
    }
}
