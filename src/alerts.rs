use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::external::{MailTrigger, SummaryEnrichment};
use crate::models::{Alert, AlertIntent, AlertKind};
use crate::notify::NotificationRecorder;
use crate::push::PushFanout;
use crate::rules;
use crate::store::FeedbackStore;

/// Owns the at-most-one-untreated-alert-per-(recipient, questionnaire)
/// invariant and the treatment state machine.
pub struct AlertLifecycle {
    store: Arc<dyn FeedbackStore>,
    recorder: Arc<NotificationRecorder>,
    fanout: Arc<PushFanout>,
    enrichment: Arc<dyn SummaryEnrichment>,
    mail: Arc<dyn MailTrigger>,
    pair_locks: Mutex<HashMap<(Uuid, Uuid), Arc<tokio::sync::Mutex<()>>>>,
}

impl AlertLifecycle {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        recorder: Arc<NotificationRecorder>,
        fanout: Arc<PushFanout>,
        enrichment: Arc<dyn SummaryEnrichment>,
        mail: Arc<dyn MailTrigger>,
    ) -> Self {
        Self {
            store,
            recorder,
            fanout,
            enrichment,
            mail,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    fn pair_lock(&self, recipient: Uuid, questionnaire: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.pair_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((recipient, questionnaire))
            .or_default()
            .clone()
    }

    /// Drops the pair's lock entry once nobody else holds or awaits it.
    /// Two strong refs means the map and our clone are the only owners
    /// left, so the entry can go; a later caller gets a fresh one.
    fn release_pair_lock(&self, key: (Uuid, Uuid), lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.pair_locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
    }

    #[cfg(test)]
    fn pair_lock_count(&self) -> usize {
        self.pair_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Runs alert detection for one freshly appended response. The
    /// aggregate is read and evaluated inside the same per-pair critical
    /// section as the upsert, so two racing submissions cannot leave the
    /// open alert citing a stale snapshot: whichever enters the section
    /// last sees every response appended before it and writes last.
    pub async fn on_response(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
    ) -> EngineResult<Option<Alert>> {
        let key = (recipient_user_id, questionnaire_id);
        let lock = self.pair_lock(recipient_user_id, questionnaire_id);
        let result = {
            let _guard = lock.lock().await;
            let aggregate = self
                .store
                .aggregate_for_questionnaire(questionnaire_id)
                .await;
            match aggregate {
                Ok(aggregate) => match rules::evaluate(&aggregate) {
                    Some(intent) => self
                        .apply_intent(recipient_user_id, questionnaire_id, intent)
                        .await
                        .map(Some),
                    None => {
                        debug!(%questionnaire_id, "aggregate within thresholds, no alert");
                        Ok(None)
                    }
                },
                Err(err) => Err(err),
            }
        };
        self.release_pair_lock(key, lock);
        result
    }

    /// Applies an externally produced alert intent under the same per-pair
    /// serialization as `on_response`.
    pub async fn on_intent(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
        intent: AlertIntent,
    ) -> EngineResult<Alert> {
        let key = (recipient_user_id, questionnaire_id);
        let lock = self.pair_lock(recipient_user_id, questionnaire_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_intent(recipient_user_id, questionnaire_id, intent)
                .await
        };
        self.release_pair_lock(key, lock);
        result
    }

    /// Atomic dedup upsert, then the audit notification, then fan-out.
    /// Callers must hold the pair lock.
    async fn apply_intent(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
        intent: AlertIntent,
    ) -> EngineResult<Alert> {
        let upsert = self
            .store
            .upsert_untreated_alert(recipient_user_id, questionnaire_id, intent.kind, &intent.message)
            .await?;

        let notification = self
            .recorder
            .record(
                recipient_user_id,
                intent.kind,
                &intent.title,
                &intent.message,
                Some(questionnaire_id),
            )
            .await?;

        // Push failures never fail the submission; the rows are durable
        // and the next connect resynchronizes.
        if let Err(err) = self
            .fanout
            .push_notification(recipient_user_id, &notification)
            .await
        {
            warn!(%recipient_user_id, %err, "notification push failed");
        }
        if let Err(err) = self.fanout.push_alert(recipient_user_id, &upsert.alert).await {
            warn!(%recipient_user_id, %err, "alert push failed");
        }

        // Only a genuinely new alert requests the feedback summary;
        // in-place updates already have one pending or present.
        if upsert.created {
            let enrichment = self.enrichment.clone();
            tokio::spawn(async move {
                if let Err(err) = enrichment.request_summary(questionnaire_id).await {
                    error!(%questionnaire_id, %err, "summary enrichment failed");
                }
            });
        }

        Ok(upsert.alert)
    }

    /// Untreated -> Treated, terminal. Silent no-op when the alert is
    /// missing, already treated, or owned by another user, so callers
    /// never need to check state first.
    pub async fn treat(&self, alert_id: Uuid, by_user: Uuid) -> EngineResult<()> {
        let Some(alert) = self.store.treat_alert(alert_id, by_user).await? else {
            return Ok(());
        };

        self.send_treatment_mail(&alert).await;

        if let Err(err) = self.fanout.refresh_counts(by_user).await {
            warn!(%by_user, %err, "counter push after treatment failed");
        }
        Ok(())
    }

    /// Sets or overwrites the staff comment at any lifecycle stage,
    /// including after treatment. Same silent no-op rules as `treat`.
    pub async fn annotate(&self, alert_id: Uuid, by_user: Uuid, comment: &str) -> EngineResult<()> {
        self.store.annotate_alert(alert_id, by_user, comment).await?;
        Ok(())
    }

    fn treatment_mail_subject(kind: AlertKind) -> &'static str {
        match kind {
            AlertKind::Negative => "A feedback concern on your course was resolved",
            AlertKind::Positive => "A positive feedback alert on your course was acknowledged",
        }
    }

    async fn send_treatment_mail(&self, alert: &Alert) {
        let recipient = match self.store.find_staff_user(alert.recipient_user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(err) => {
                warn!(%err, "staff lookup for treatment mail failed");
                return;
            }
        };

        let mail = self.mail.clone();
        let kind = alert.kind;
        let subject = Self::treatment_mail_subject(kind);
        tokio::spawn(async move {
            if let Err(err) = mail
                .send_alert_related_email(kind, &recipient.email, subject)
                .await
            {
                error!(recipient = %recipient.email, %err, "treatment mail failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{LoggingMailTrigger, NoopEnrichment};
    use crate::models::{AlertStatus, Questionnaire, QuestionnaireType, StaffUser};
    use crate::presence::PresenceRegistry;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn lifecycle_with_mail(
        mail: Arc<dyn MailTrigger>,
    ) -> (Arc<MemoryStore>, AlertLifecycle) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let recorder = Arc::new(NotificationRecorder::new(store.clone()));
        let fanout = Arc::new(PushFanout::new(store.clone(), registry));
        let lifecycle = AlertLifecycle::new(
            store.clone(),
            recorder,
            fanout,
            Arc::new(NoopEnrichment),
            mail,
        );
        (store, lifecycle)
    }

    fn lifecycle_with_store() -> (Arc<MemoryStore>, AlertLifecycle) {
        lifecycle_with_mail(Arc::new(LoggingMailTrigger))
    }

    fn negative_intent(message: &str) -> AlertIntent {
        AlertIntent {
            kind: AlertKind::Negative,
            title: "Feedback needs attention (during course)".to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn repeated_intents_update_one_alert_in_place() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        let first = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("first"))
            .await
            .expect("first intent");
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("second"))
            .await
            .expect("second intent");

        assert_eq!(first.id, second.id);
        assert_eq!(second.message, "second");
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.created_at, first.created_at);

        let open = store
            .list_alerts(recipient, Some(AlertStatus::Untreated))
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn every_upsert_appends_a_notification() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        for i in 0..3 {
            lifecycle
                .on_intent(recipient, questionnaire, negative_intent(&format!("v{i}")))
                .await
                .expect("intent");
        }

        let notifications = store
            .list_notifications(recipient, None)
            .await
            .expect("list");
        assert_eq!(notifications.len(), 3);
    }

    // The aggregate is evaluated when the intent is applied, not when the
    // triggering response arrived, so the open alert always describes the
    // store's current state.
    #[tokio::test]
    async fn on_response_reads_the_aggregate_at_apply_time() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        store
            .insert_questionnaire(Questionnaire {
                id: questionnaire,
                subject: "Intro to Statistics".to_string(),
                kind: QuestionnaireType::During,
                owner_user_id: recipient,
            })
            .await;

        store
            .append_response(questionnaire, 5, None, "s-0".to_string())
            .await
            .expect("append");
        let first = lifecycle
            .on_response(recipient, questionnaire)
            .await
            .expect("first")
            .expect("alert");
        assert!(first.message.contains("1 response"));

        for i in 1..3 {
            store
                .append_response(questionnaire, 5, None, format!("s-{i}"))
                .await
                .expect("append");
        }
        let second = lifecycle
            .on_response(recipient, questionnaire)
            .await
            .expect("second")
            .expect("alert");
        assert_eq!(second.id, first.id);
        assert!(second.message.contains("3 response"));
    }

    #[tokio::test]
    async fn treat_transitions_once_and_is_then_a_noop() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        let alert = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("open"))
            .await
            .expect("intent");

        lifecycle.treat(alert.id, recipient).await.expect("treat");
        let treated = store
            .list_alerts(recipient, Some(AlertStatus::Treated))
            .await
            .expect("list");
        assert_eq!(treated[0].status, AlertStatus::Treated);
        assert_eq!(treated[0].treated_by, Some(recipient));
        assert!(treated[0].treated_at.is_some());
        let first_treated_at = treated[0].treated_at;

        // Second treat: no error, no second transition.
        lifecycle.treat(alert.id, recipient).await.expect("repeat");
        let after = store
            .list_alerts(recipient, Some(AlertStatus::Treated))
            .await
            .expect("list");
        assert_eq!(after[0].treated_at, first_treated_at);
    }

    #[tokio::test]
    async fn foreign_user_cannot_treat_or_annotate() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        let alert = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("open"))
            .await
            .expect("intent");

        lifecycle.treat(alert.id, stranger).await.expect("treat");
        lifecycle
            .annotate(alert.id, stranger, "not yours")
            .await
            .expect("annotate");

        let open = store
            .list_alerts(recipient, Some(AlertStatus::Untreated))
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].comment, None);
    }

    #[tokio::test]
    async fn annotate_is_allowed_after_treatment() {
        let (store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        let alert = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("open"))
            .await
            .expect("intent");
        lifecycle.treat(alert.id, recipient).await.expect("treat");
        lifecycle
            .annotate(alert.id, recipient, "followed up with the class")
            .await
            .expect("annotate");

        let treated = store
            .list_alerts(recipient, Some(AlertStatus::Treated))
            .await
            .expect("list");
        assert_eq!(
            treated[0].comment.as_deref(),
            Some("followed up with the class")
        );
    }

    #[tokio::test]
    async fn concurrent_intents_produce_exactly_one_alert() {
        let (store, lifecycle) = lifecycle_with_store();
        let lifecycle = Arc::new(lifecycle);
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move {
                    lifecycle
                        .on_intent(recipient, questionnaire, negative_intent(&format!("c{i}")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("intent");
        }

        let open = store
            .list_alerts(recipient, Some(AlertStatus::Untreated))
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn idle_pair_locks_are_evicted() {
        let (_store, lifecycle) = lifecycle_with_store();
        let recipient = Uuid::new_v4();

        for _ in 0..4 {
            lifecycle
                .on_intent(recipient, Uuid::new_v4(), negative_intent("open"))
                .await
                .expect("intent");
        }

        assert_eq!(lifecycle.pair_lock_count(), 0);
    }

    struct RecordingMail {
        sent: mpsc::UnboundedSender<(AlertKind, String, String)>,
    }

    #[async_trait]
    impl MailTrigger for RecordingMail {
        async fn send_alert_related_email(
            &self,
            kind: AlertKind,
            recipient_address: &str,
            subject_line: &str,
        ) -> anyhow::Result<()> {
            let _ = self.sent.send((
                kind,
                recipient_address.to_string(),
                subject_line.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn treatment_mail_uses_the_acknowledgment_template() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let (store, lifecycle) = lifecycle_with_mail(Arc::new(RecordingMail { sent: sent_tx }));
        let recipient = Uuid::new_v4();
        let questionnaire = Uuid::new_v4();

        store
            .insert_staff_user(StaffUser {
                id: recipient,
                full_name: "Noa Fischer".to_string(),
                email: "noa.fischer@example.edu".to_string(),
            })
            .await;

        let alert = lifecycle
            .on_intent(recipient, questionnaire, negative_intent("raw rule text"))
            .await
            .expect("intent");
        lifecycle.treat(alert.id, recipient).await.expect("treat");

        let (kind, address, subject) = sent_rx.recv().await.expect("mail");
        assert_eq!(kind, AlertKind::Negative);
        assert_eq!(address, "noa.fischer@example.edu");
        assert_eq!(subject, "A feedback concern on your course was resolved");
        assert!(!subject.contains("raw rule text"));
    }
}
