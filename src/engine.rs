use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use crate::alerts::AlertLifecycle;
use crate::error::{EngineError, EngineResult};
use crate::external::{MailTrigger, SummaryEnrichment};
use crate::models::{
    Alert, AlertStatus, Notification, PushMessage, ResponseRecord,
};
use crate::notify::NotificationRecorder;
use crate::presence::{HandleId, PresenceRegistry};
use crate::push::PushFanout;
use crate::store::FeedbackStore;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

/// Outcome of one response submission: the persisted response and the
/// alert the new aggregate produced, if any.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub response: ResponseRecord,
    pub alert: Option<Alert>,
}

/// Composition root wiring the store, rule evaluation, alert lifecycle,
/// notification trail and live fan-out together. The transport layer
/// (HTTP, WebSocket) talks only to this type.
pub struct AlertEngine {
    store: Arc<dyn FeedbackStore>,
    registry: Arc<PresenceRegistry>,
    fanout: Arc<PushFanout>,
    lifecycle: AlertLifecycle,
    recorder: Arc<NotificationRecorder>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        enrichment: Arc<dyn SummaryEnrichment>,
        mail: Arc<dyn MailTrigger>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let recorder = Arc::new(NotificationRecorder::new(store.clone()));
        let fanout = Arc::new(PushFanout::new(store.clone(), registry.clone()));
        let lifecycle = AlertLifecycle::new(
            store.clone(),
            recorder.clone(),
            fanout.clone(),
            enrichment,
            mail,
        );

        Self {
            store,
            registry,
            fanout,
            lifecycle,
            recorder,
        }
    }

    /// Persists a response, then evaluates the fresh aggregate against the
    /// threshold rules and upserts an alert for the questionnaire's owner
    /// when one is warranted.
    ///
    /// A store failure in the alert step is propagated, but it never rolls
    /// back the already-appended response; the missing alert is degraded
    /// state that self-heals on the next response to the questionnaire.
    pub async fn submit_response(
        &self,
        questionnaire_id: Uuid,
        rating: i32,
        comment: Option<String>,
        submitter: String,
    ) -> EngineResult<SubmitOutcome> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(EngineError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {rating}"
            )));
        }

        let questionnaire = self.store.find_questionnaire(questionnaire_id).await?;
        let response = self
            .store
            .append_response(questionnaire_id, rating, comment, submitter)
            .await?;

        // Aggregate read and evaluation happen inside the lifecycle's
        // per-pair critical section, so racing submissions apply their
        // upserts against the aggregate as it stands at apply time.
        let alert = self
            .lifecycle
            .on_response(questionnaire.owner_user_id, questionnaire_id)
            .await?;

        Ok(SubmitOutcome { response, alert })
    }

    pub async fn list_notifications(
        &self,
        user: Uuid,
        is_read: Option<bool>,
    ) -> EngineResult<Vec<Notification>> {
        self.store.list_notifications(user, is_read).await
    }

    pub async fn list_alerts(
        &self,
        user: Uuid,
        status: Option<AlertStatus>,
    ) -> EngineResult<Vec<Alert>> {
        self.store.list_alerts(user, status).await
    }

    pub async fn treat_alert(&self, alert_id: Uuid, user: Uuid) -> EngineResult<()> {
        self.lifecycle.treat(alert_id, user).await
    }

    pub async fn comment_alert(&self, alert_id: Uuid, user: Uuid, text: &str) -> EngineResult<()> {
        self.lifecycle.annotate(alert_id, user, text).await
    }

    pub async fn mark_read(&self, notification_id: Uuid, user: Uuid) -> EngineResult<bool> {
        self.recorder.mark_read(notification_id, user).await
    }

    pub async fn mark_all_read(&self, user: Uuid) -> EngineResult<u64> {
        self.recorder.mark_all_read(user).await
    }

    /// Transport connect hook. Registers a live channel for the user and
    /// immediately pushes the authoritative counters so a client that was
    /// offline is corrected without message replay.
    pub async fn connect(
        &self,
        user: Uuid,
    ) -> EngineResult<(HandleId, UnboundedReceiver<PushMessage>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = HandleId::new();
        self.registry.register(user, handle, tx);
        // A failed counter sync hands back an error and drops the
        // receiver, so the handle must not stay behind as a dead entry.
        if let Err(err) = self.fanout.sync_on_connect(user).await {
            self.registry.unregister(handle);
            return Err(err);
        }
        Ok((handle, rx))
    }

    /// Transport disconnect hook. Removes only the given handle; other
    /// sessions of the same user keep receiving pushes.
    pub fn disconnect(&self, handle: HandleId) {
        self.registry.unregister(handle);
    }

    #[cfg(test)]
    fn connected_handles(&self, user: Uuid) -> usize {
        self.registry.connection_count(user)
    }
}
