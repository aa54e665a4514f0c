use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::models::AlertKind;

/// Outbound mail, fire-and-forget. Failures are logged by the caller and
/// never reach the submission or treatment path.
#[async_trait]
pub trait MailTrigger: Send + Sync {
    async fn send_alert_related_email(
        &self,
        kind: AlertKind,
        recipient_address: &str,
        subject_line: &str,
    ) -> anyhow::Result<()>;
}

/// Asynchronous enrichment that produces an AI-generated summary of the
/// feedback for a questionnaire. Opaque to the engine; requested once per
/// newly opened alert and never awaited by the submission path.
#[async_trait]
pub trait SummaryEnrichment: Send + Sync {
    async fn request_summary(&self, questionnaire_id: Uuid) -> anyhow::Result<()>;
}

/// Default mail trigger that records the send instead of delivering.
pub struct LoggingMailTrigger;

#[async_trait]
impl MailTrigger for LoggingMailTrigger {
    async fn send_alert_related_email(
        &self,
        kind: AlertKind,
        recipient_address: &str,
        subject_line: &str,
    ) -> anyhow::Result<()> {
        info!(
            kind = kind.as_str(),
            recipient = recipient_address,
            subject = subject_line,
            "mail trigger invoked"
        );
        Ok(())
    }
}

/// Default enrichment that records the request instead of dispatching.
pub struct NoopEnrichment;

#[async_trait]
impl SummaryEnrichment for NoopEnrichment {
    async fn request_summary(&self, questionnaire_id: Uuid) -> anyhow::Result<()> {
        info!(%questionnaire_id, "summary enrichment requested");
        Ok(())
    }
}
