use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{Alert, Notification, PushMessage};
use crate::presence::PresenceRegistry;
use crate::store::FeedbackStore;

/// Best-effort delivery to every live connection of one user, followed by
/// a counter refresh. Counters are always recomputed from the store, never
/// tracked in memory, so a reconnecting client or a second server process
/// sees ground truth instead of drifted numbers.
pub struct PushFanout {
    store: Arc<dyn FeedbackStore>,
    registry: Arc<PresenceRegistry>,
}

impl PushFanout {
    pub fn new(store: Arc<dyn FeedbackStore>, registry: Arc<PresenceRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn push_alert(&self, user_id: Uuid, alert: &Alert) -> EngineResult<()> {
        if !self.deliver(user_id, PushMessage::NewAlert { data: alert.clone() }) {
            return Ok(());
        }
        self.refresh_counts(user_id).await
    }

    pub async fn push_notification(
        &self,
        user_id: Uuid,
        notification: &Notification,
    ) -> EngineResult<()> {
        if !self.deliver(
            user_id,
            PushMessage::NewNotification {
                data: notification.clone(),
            },
        ) {
            return Ok(());
        }
        self.refresh_counts(user_id).await
    }

    /// Pushes the authoritative unread/untreated counters. Called on every
    /// client connect so a session that missed pushes while offline is
    /// corrected without replaying missed messages.
    pub async fn sync_on_connect(&self, user_id: Uuid) -> EngineResult<()> {
        self.refresh_counts(user_id).await
    }

    pub async fn refresh_counts(&self, user_id: Uuid) -> EngineResult<()> {
        let unread = self.store.count_unread_notifications(user_id).await?;
        let untreated = self.store.count_untreated_alerts(user_id).await?;

        self.deliver(user_id, PushMessage::UnreadCount { value: unread });
        self.deliver(
            user_id,
            PushMessage::UntreatedAlertCount { value: untreated },
        );
        Ok(())
    }

    /// Returns false when the user has no live connection. Offline users
    /// are a silent no-op: the rows are already durable and the next
    /// connect resynchronizes.
    fn deliver(&self, user_id: Uuid, message: PushMessage) -> bool {
        let senders = self.registry.senders_for(user_id);
        if senders.is_empty() {
            debug!(%user_id, "no live connection, push skipped");
            return false;
        }

        for sender in senders {
            if sender.send(message.clone()).is_err() {
                debug!(%user_id, "push to closed channel dropped");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, AlertStatus};
    use crate::presence::HandleId;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn sample_alert(user: Uuid) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            recipient_user_id: user,
            questionnaire_id: Uuid::new_v4(),
            kind: AlertKind::Negative,
            message: "Average rating is low (2.00)".to_string(),
            status: AlertStatus::Untreated,
            comment: None,
            treated_at: None,
            treated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn offline_user_push_is_a_silent_noop() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let fanout = PushFanout::new(store, registry);
        let user = Uuid::new_v4();

        fanout
            .push_alert(user, &sample_alert(user))
            .await
            .expect("offline push must not fail");
    }

    #[tokio::test]
    async fn connected_user_receives_payload_and_counters() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let fanout = PushFanout::new(store.clone(), registry.clone());
        let user = Uuid::new_v4();

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(user, HandleId::new(), tx);

        let alert = sample_alert(user);
        fanout.push_alert(user, &alert).await.expect("push");

        match rx.recv().await.expect("alert payload") {
            PushMessage::NewAlert { data } => assert_eq!(data.id, alert.id),
            other => panic!("unexpected message {other:?}"),
        }
        match rx.recv().await.expect("unread counter") {
            PushMessage::UnreadCount { value } => assert_eq!(value, 0),
            other => panic!("unexpected message {other:?}"),
        }
        match rx.recv().await.expect("untreated counter") {
            PushMessage::UntreatedAlertCount { value } => assert_eq!(value, 0),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn counters_come_from_the_store_not_the_registry() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let fanout = PushFanout::new(store.clone(), registry.clone());
        let user = Uuid::new_v4();

        store
            .create_notification(user, AlertKind::Negative, "t", "m", None)
            .await
            .expect("notification");

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(user, HandleId::new(), tx);

        fanout.sync_on_connect(user).await.expect("sync");

        match rx.recv().await.expect("unread counter") {
            PushMessage::UnreadCount { value } => assert_eq!(value, 1),
            other => panic!("unexpected message {other:?}"),
        }
        match rx.recv().await.expect("untreated counter") {
            PushMessage::UntreatedAlertCount { value } => assert_eq!(value, 0),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
