use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::models::PushMessage;

/// Identifies one live connection so disconnect can remove exactly it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

struct PresenceEntry {
    handle: HandleId,
    sender: UnboundedSender<PushMessage>,
}

/// Live connections per user. Purely ephemeral: empty at process start,
/// emptied entry-by-entry on disconnect, never persisted and never
/// authoritative for counts. Mutated from concurrent connect/disconnect
/// paths, so all access goes through one lock with no await inside.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<Uuid, Vec<PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: registering the same handle twice keeps one entry.
    pub fn register(&self, user_id: Uuid, handle: HandleId, sender: UnboundedSender<PushMessage>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let handles = entries.entry(user_id).or_default();
        if handles.iter().any(|entry| entry.handle == handle) {
            return;
        }
        handles.push(PresenceEntry { handle, sender });
    }

    /// Removes only the given handle; other sessions of the same user
    /// stay registered. Unknown handles are ignored.
    pub fn unregister(&self, handle: HandleId) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, handles| {
            handles.retain(|entry| entry.handle != handle);
            !handles.is_empty()
        });
    }

    pub fn senders_for(&self, user_id: Uuid) -> Vec<UnboundedSender<PushMessage>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&user_id)
            .map(|handles| handles.iter().map(|entry| entry.sender.clone()).collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&user_id).map_or(0, |handles| handles.len())
    }
}
