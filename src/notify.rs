use std::sync::Arc;

use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{AlertKind, Notification};
use crate::store::FeedbackStore;

/// Append-only audit trail of "something happened". Every alert upsert
/// produces a fresh entry, including in-place updates of an open alert;
/// entries are never mutated to follow the alert's later treatment.
pub struct NotificationRecorder {
    store: Arc<dyn FeedbackStore>,
}

impl NotificationRecorder {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        recipient_user_id: Uuid,
        kind: AlertKind,
        title: &str,
        message: &str,
        questionnaire_id: Option<Uuid>,
    ) -> EngineResult<Notification> {
        self.store
            .create_notification(recipient_user_id, kind, title, message, questionnaire_id)
            .await
    }

    /// Idempotent and ownership-guarded: already read, missing, or another
    /// user's notification all leave the row untouched and return Ok.
    pub async fn mark_read(&self, id: Uuid, owner: Uuid) -> EngineResult<bool> {
        self.store.mark_notification_read(id, owner).await
    }

    pub async fn mark_all_read(&self, owner: Uuid) -> EngineResult<u64> {
        self.store.mark_all_notifications_read(owner).await
    }
}
