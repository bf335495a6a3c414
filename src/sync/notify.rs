//! Change notification bus.
//!
//! Fires after every successful local write so presentation layers can
//! refresh without polling. Fire-and-forget, at-most-once: a lagging or
//! absent subscriber simply misses notifications.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::EntityKind;

const CHANNEL_CAPACITY: usize = 256;

/// What changed, for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub entity_id: Uuid,
    pub owner_id: String,
    pub kind: EntityKind,
    /// True when the write created the record, false for an in-place update.
    pub is_new: bool,
}

/// Cloneable handle to the broadcast channel. Repositories publish, UI
/// layers subscribe.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    /// Publishes a change. Errors (no active subscribers) are ignored.
    pub fn publish(&self, entity_id: Uuid, owner_id: &str, kind: EntityKind, is_new: bool) {
        let _ = self.sender.send(ChangeNotification {
            entity_id,
            owner_id: owner_id.to_string(),
            kind,
            is_new,
        });
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
