//! Background synchronization: durable outbox, processor, remote handlers,
//! and the change notification bus.
//!
//! Local writes commit an entity row and a sync-intent event in one
//! transaction (see the `db` repositories). This module owns everything
//! that happens after the commit: draining the queue, pushing records to
//! the backend, and broadcasting change notifications to the UI.

pub mod api;
pub mod handlers;
pub mod notify;
pub mod payload;
pub mod processor;

pub use api::{ApiClient, CredentialProvider, RemoteBackend, RemoteError, StaticCredentials};
pub use handlers::{dispatch, DispatchError};
pub use notify::{ChangeNotification, ChangeNotifier};
pub use payload::{
    MealLogPayload, ProgressPayload, SnapshotPayload, TemplatePayload, WorkoutPayload,
};
pub use processor::{CycleReport, OutboxProcessor, ProcessorSettings};
