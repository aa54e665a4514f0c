use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    AggregateSnapshot, Alert, AlertKind, AlertStatus, Notification, Questionnaire,
    QuestionnaireType, ResponseRecord, StaffUser,
};

/// Result of the dedup upsert: the row as persisted, plus whether a new
/// alert was created (as opposed to the open one being updated in place).
#[derive(Debug, Clone)]
pub struct AlertUpsert {
    pub alert: Alert,
    pub created: bool,
}

/// Transactional persistence boundary. The engine never caches what this
/// trait returns; counts and aggregates are recomputed on every call.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn find_questionnaire(&self, id: Uuid) -> EngineResult<Questionnaire>;

    async fn find_staff_user(&self, id: Uuid) -> EngineResult<Option<StaffUser>>;

    /// Appends a response. A second response from the same submitter for
    /// the same questionnaire is rejected as a validation failure.
    async fn append_response(
        &self,
        questionnaire_id: Uuid,
        rating: i32,
        comment: Option<String>,
        submitter: String,
    ) -> EngineResult<ResponseRecord>;

    async fn aggregate_for_questionnaire(&self, id: Uuid) -> EngineResult<AggregateSnapshot>;

    /// Atomic create-or-update of the single untreated alert for
    /// (recipient, questionnaire). Must not admit two untreated rows for
    /// the same pair under concurrent callers.
    async fn upsert_untreated_alert(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
        kind: AlertKind,
        message: &str,
    ) -> EngineResult<AlertUpsert>;

    /// Untreated -> Treated, only when the alert belongs to `by_user` and
    /// is still untreated. Returns the treated row, or None for the no-op
    /// cases (missing, foreign, already treated).
    async fn treat_alert(&self, alert_id: Uuid, by_user: Uuid) -> EngineResult<Option<Alert>>;

    /// Sets/overwrites the staff comment at any lifecycle stage. Returns
    /// None when the alert is missing or owned by someone else.
    async fn annotate_alert(
        &self,
        alert_id: Uuid,
        by_user: Uuid,
        comment: &str,
    ) -> EngineResult<Option<Alert>>;

    async fn create_notification(
        &self,
        recipient_user_id: Uuid,
        kind: AlertKind,
        title: &str,
        message: &str,
        questionnaire_id: Option<Uuid>,
    ) -> EngineResult<Notification>;

    /// Idempotent; returns false when nothing changed (already read,
    /// missing, or owned by someone else).
    async fn mark_notification_read(&self, id: Uuid, owner: Uuid) -> EngineResult<bool>;

    async fn mark_all_notifications_read(&self, owner: Uuid) -> EngineResult<u64>;

    async fn count_unread_notifications(&self, user: Uuid) -> EngineResult<i64>;

    async fn count_untreated_alerts(&self, user: Uuid) -> EngineResult<i64>;

    async fn list_notifications(
        &self,
        user: Uuid,
        is_read: Option<bool>,
    ) -> EngineResult<Vec<Notification>>;

    async fn list_alerts(
        &self,
        user: Uuid,
        status: Option<AlertStatus>,
    ) -> EngineResult<Vec<Alert>>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn seed(&self) -> anyhow::Result<()> {
        let staff = vec![
            (
                Uuid::parse_str("7a1f3c9e-5b2d-4f81-9c64-1d2e8a7b3f50")?,
                "Noa Fischer",
                "noa.fischer@example.edu",
            ),
            (
                Uuid::parse_str("2e9b6d41-8c3a-4f07-b5d2-9a6e1c4f7d83")?,
                "Sam Okafor",
                "sam.okafor@example.edu",
            ),
        ];

        for (id, name, email) in &staff {
            sqlx::query(
                r#"
                INSERT INTO feedback_alerts.staff_users (id, full_name, email)
                VALUES ($1, $2, $3)
                ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(email)
            .execute(&self.pool)
            .await
            .context("failed to seed staff users")?;
        }

        let questionnaires = vec![
            (
                Uuid::parse_str("b4c8f2a6-1e5d-4c39-8a7b-2f6d9e3c1a84")?,
                "Intro to Statistics",
                QuestionnaireType::During,
                staff[0].0,
            ),
            (
                Uuid::parse_str("c5d9e3b7-2f6e-4d40-9b8c-3a7e0f4d2b95")?,
                "Intro to Statistics",
                QuestionnaireType::After,
                staff[0].0,
            ),
            (
                Uuid::parse_str("d6e0f4c8-3a7f-4e51-0c9d-4b8f1a5e3c06")?,
                "Organic Chemistry",
                QuestionnaireType::During,
                staff[1].0,
            ),
        ];

        for (id, subject, kind, owner) in questionnaires {
            sqlx::query(
                r#"
                INSERT INTO feedback_alerts.questionnaires (id, subject, kind, owner_user_id)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                SET subject = EXCLUDED.subject, kind = EXCLUDED.kind,
                    owner_user_id = EXCLUDED.owner_user_id
                "#,
            )
            .bind(id)
            .bind(subject)
            .bind(kind.as_str())
            .bind(owner)
            .execute(&self.pool)
            .await
            .context("failed to seed questionnaires")?;
        }

        Ok(())
    }
}

fn alert_from_row(row: &PgRow) -> EngineResult<Alert> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(Alert {
        id: row.get("id"),
        recipient_user_id: row.get("recipient_user_id"),
        questionnaire_id: row.get("questionnaire_id"),
        kind: AlertKind::parse(&kind)
            .ok_or_else(|| EngineError::Store(anyhow::anyhow!("unknown alert kind {kind}")))?,
        message: row.get("message"),
        status: AlertStatus::parse(&status)
            .ok_or_else(|| EngineError::Store(anyhow::anyhow!("unknown alert status {status}")))?,
        comment: row.get("comment"),
        treated_at: row.get("treated_at"),
        treated_by: row.get("treated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn notification_from_row(row: &PgRow) -> EngineResult<Notification> {
    let kind: String = row.get("kind");
    Ok(Notification {
        id: row.get("id"),
        recipient_user_id: row.get("recipient_user_id"),
        kind: AlertKind::parse(&kind)
            .ok_or_else(|| EngineError::Store(anyhow::anyhow!("unknown kind {kind}")))?,
        title: row.get("title"),
        message: row.get("message"),
        questionnaire_id: row.get("questionnaire_id"),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    })
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl FeedbackStore for PgStore {
    async fn find_questionnaire(&self, id: Uuid) -> EngineResult<Questionnaire> {
        let row = sqlx::query(
            "SELECT id, subject, kind, owner_user_id FROM feedback_alerts.questionnaires WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load questionnaire")?
        .ok_or(EngineError::NotFound("questionnaire"))?;

        let kind: String = row.get("kind");
        Ok(Questionnaire {
            id: row.get("id"),
            subject: row.get("subject"),
            kind: QuestionnaireType::parse(&kind).ok_or_else(|| {
                EngineError::Store(anyhow::anyhow!("unknown questionnaire kind {kind}"))
            })?,
            owner_user_id: row.get("owner_user_id"),
        })
    }

    async fn find_staff_user(&self, id: Uuid) -> EngineResult<Option<StaffUser>> {
        let row = sqlx::query(
            "SELECT id, full_name, email FROM feedback_alerts.staff_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load staff user")?;

        Ok(row.map(|row| StaffUser {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
        }))
    }

    async fn append_response(
        &self,
        questionnaire_id: Uuid,
        rating: i32,
        comment: Option<String>,
        submitter: String,
    ) -> EngineResult<ResponseRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO feedback_alerts.responses
            (id, questionnaire_id, rating, comment, submitter, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(questionnaire_id)
        .bind(rating)
        .bind(&comment)
        .bind(&submitter)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(ResponseRecord {
                id,
                questionnaire_id,
                rating,
                comment,
                submitter,
                created_at: now,
            }),
            Err(err) if is_unique_violation(&err, "responses_questionnaire_submitter_key") => {
                Err(EngineError::Validation(
                    "a response was already submitted for this questionnaire".into(),
                ))
            }
            Err(err) => Err(anyhow::Error::from(err)
                .context("failed to append response")
                .into()),
        }
    }

    async fn aggregate_for_questionnaire(&self, id: Uuid) -> EngineResult<AggregateSnapshot> {
        let questionnaire = self.find_questionnaire(id).await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS response_count,
                   COALESCE(AVG(rating::float8), 0::float8) AS mean_rating
            FROM feedback_alerts.responses
            WHERE questionnaire_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate responses")?;

        Ok(AggregateSnapshot {
            response_count: row.get("response_count"),
            mean_rating: row.get("mean_rating"),
            questionnaire_type: questionnaire.kind,
        })
    }

    async fn upsert_untreated_alert(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
        kind: AlertKind,
        message: &str,
    ) -> EngineResult<AlertUpsert> {
        let now = Utc::now();

        // Single atomic statement against the partial unique index on
        // (recipient, questionnaire) WHERE status = 'untreated'. xmax = 0
        // distinguishes a fresh insert from an in-place update.
        let row = sqlx::query(
            r#"
            INSERT INTO feedback_alerts.alerts
            (id, recipient_user_id, questionnaire_id, kind, message, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'untreated', $6, $6)
            ON CONFLICT (recipient_user_id, questionnaire_id) WHERE status = 'untreated'
            DO UPDATE SET kind = EXCLUDED.kind, message = EXCLUDED.message,
                          updated_at = EXCLUDED.updated_at
            RETURNING id, recipient_user_id, questionnaire_id, kind, message, status,
                      comment, treated_at, treated_by, created_at, updated_at,
                      (xmax = 0) AS was_created
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(recipient_user_id)
        .bind(questionnaire_id)
        .bind(kind.as_str())
        .bind(message)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert alert")?;

        Ok(AlertUpsert {
            created: row.get("was_created"),
            alert: alert_from_row(&row)?,
        })
    }

    async fn treat_alert(&self, alert_id: Uuid, by_user: Uuid) -> EngineResult<Option<Alert>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            UPDATE feedback_alerts.alerts
            SET status = 'treated', treated_at = $3, treated_by = $2, updated_at = $3
            WHERE id = $1 AND recipient_user_id = $2 AND status = 'untreated'
            RETURNING id, recipient_user_id, questionnaire_id, kind, message, status,
                      comment, treated_at, treated_by, created_at, updated_at
            "#,
        )
        .bind(alert_id)
        .bind(by_user)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("failed to treat alert")?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn annotate_alert(
        &self,
        alert_id: Uuid,
        by_user: Uuid,
        comment: &str,
    ) -> EngineResult<Option<Alert>> {
        let row = sqlx::query(
            r#"
            UPDATE feedback_alerts.alerts
            SET comment = $3, updated_at = $4
            WHERE id = $1 AND recipient_user_id = $2
            RETURNING id, recipient_user_id, questionnaire_id, kind, message, status,
                      comment, treated_at, treated_by, created_at, updated_at
            "#,
        )
        .bind(alert_id)
        .bind(by_user)
        .bind(comment)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to annotate alert")?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn create_notification(
        &self,
        recipient_user_id: Uuid,
        kind: AlertKind,
        title: &str,
        message: &str,
        questionnaire_id: Option<Uuid>,
    ) -> EngineResult<Notification> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO feedback_alerts.notifications
            (id, recipient_user_id, kind, title, message, questionnaire_id, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
            "#,
        )
        .bind(id)
        .bind(recipient_user_id)
        .bind(kind.as_str())
        .bind(title)
        .bind(message)
        .bind(questionnaire_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to create notification")?;

        Ok(Notification {
            id,
            recipient_user_id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            questionnaire_id,
            is_read: false,
            read_at: None,
            created_at: now,
        })
    }

    async fn mark_notification_read(&self, id: Uuid, owner: Uuid) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feedback_alerts.notifications
            SET is_read = TRUE, read_at = $3
            WHERE id = $1 AND recipient_user_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to mark notification read")?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, owner: Uuid) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE feedback_alerts.notifications
            SET is_read = TRUE, read_at = $2
            WHERE recipient_user_id = $1 AND is_read = FALSE
            "#,
        )
        .bind(owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to mark notifications read")?;

        Ok(result.rows_affected())
    }

    async fn count_unread_notifications(&self, user: Uuid) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS unread FROM feedback_alerts.notifications \
             WHERE recipient_user_id = $1 AND is_read = FALSE",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .context("failed to count unread notifications")?;

        Ok(row.get("unread"))
    }

    async fn count_untreated_alerts(&self, user: Uuid) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS untreated FROM feedback_alerts.alerts \
             WHERE recipient_user_id = $1 AND status = 'untreated'",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .context("failed to count untreated alerts")?;

        Ok(row.get("untreated"))
    }

    async fn list_notifications(
        &self,
        user: Uuid,
        is_read: Option<bool>,
    ) -> EngineResult<Vec<Notification>> {
        let mut query = String::from(
            "SELECT id, recipient_user_id, kind, title, message, questionnaire_id, \
             is_read, read_at, created_at \
             FROM feedback_alerts.notifications WHERE recipient_user_id = $1",
        );
        if is_read.is_some() {
            query.push_str(" AND is_read = $2");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut rows = sqlx::query(&query).bind(user);
        if let Some(value) = is_read {
            rows = rows.bind(value);
        }

        let records = rows
            .fetch_all(&self.pool)
            .await
            .context("failed to list notifications")?;

        records.iter().map(notification_from_row).collect()
    }

    async fn list_alerts(
        &self,
        user: Uuid,
        status: Option<AlertStatus>,
    ) -> EngineResult<Vec<Alert>> {
        let mut query = String::from(
            "SELECT id, recipient_user_id, questionnaire_id, kind, message, status, \
             comment, treated_at, treated_by, created_at, updated_at \
             FROM feedback_alerts.alerts WHERE recipient_user_id = $1",
        );
        if status.is_some() {
            query.push_str(" AND status = $2");
        }
        query.push_str(" ORDER BY updated_at DESC");

        let mut rows = sqlx::query(&query).bind(user);
        if let Some(value) = status {
            rows = rows.bind(value.as_str());
        }

        let records = rows
            .fetch_all(&self.pool)
            .await
            .context("failed to list alerts")?;

        records.iter().map(alert_from_row).collect()
    }
}

/// In-memory store used as a stub and by the test suite. A single mutex
/// over the whole state makes every operation, including the alert
/// upsert, one critical section.
#[derive(Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    staff_users: std::collections::HashMap<Uuid, StaffUser>,
    questionnaires: std::collections::HashMap<Uuid, Questionnaire>,
    responses: Vec<ResponseRecord>,
    alerts: Vec<Alert>,
    notifications: Vec<Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_questionnaire(&self, questionnaire: Questionnaire) {
        let mut inner = self.inner.lock().await;
        inner
            .questionnaires
            .insert(questionnaire.id, questionnaire);
    }

    pub async fn insert_staff_user(&self, user: StaffUser) {
        let mut inner = self.inner.lock().await;
        inner.staff_users.insert(user.id, user);
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn find_questionnaire(&self, id: Uuid) -> EngineResult<Questionnaire> {
        let inner = self.inner.lock().await;
        inner
            .questionnaires
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound("questionnaire"))
    }

    async fn find_staff_user(&self, id: Uuid) -> EngineResult<Option<StaffUser>> {
        let inner = self.inner.lock().await;
        Ok(inner.staff_users.get(&id).cloned())
    }

    async fn append_response(
        &self,
        questionnaire_id: Uuid,
        rating: i32,
        comment: Option<String>,
        submitter: String,
    ) -> EngineResult<ResponseRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.questionnaires.contains_key(&questionnaire_id) {
            return Err(EngineError::NotFound("questionnaire"));
        }
        let duplicate = inner
            .responses
            .iter()
            .any(|r| r.questionnaire_id == questionnaire_id && r.submitter == submitter);
        if duplicate {
            return Err(EngineError::Validation(
                "a response was already submitted for this questionnaire".into(),
            ));
        }

        let record = ResponseRecord {
            id: Uuid::new_v4(),
            questionnaire_id,
            rating,
            comment,
            submitter,
            created_at: Utc::now(),
        };
        inner.responses.push(record.clone());
        Ok(record)
    }

    async fn aggregate_for_questionnaire(&self, id: Uuid) -> EngineResult<AggregateSnapshot> {
        let inner = self.inner.lock().await;
        let questionnaire = inner
            .questionnaires
            .get(&id)
            .ok_or(EngineError::NotFound("questionnaire"))?;

        let ratings: Vec<i32> = inner
            .responses
            .iter()
            .filter(|r| r.questionnaire_id == id)
            .map(|r| r.rating)
            .collect();
        let count = ratings.len() as i64;
        let mean = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64
        };

        Ok(AggregateSnapshot {
            response_count: count,
            mean_rating: mean,
            questionnaire_type: questionnaire.kind,
        })
    }

    async fn upsert_untreated_alert(
        &self,
        recipient_user_id: Uuid,
        questionnaire_id: Uuid,
        kind: AlertKind,
        message: &str,
    ) -> EngineResult<AlertUpsert> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        if let Some(existing) = inner.alerts.iter_mut().find(|a| {
            a.recipient_user_id == recipient_user_id
                && a.questionnaire_id == questionnaire_id
                && a.status == AlertStatus::Untreated
        }) {
            existing.kind = kind;
            existing.message = message.to_string();
            existing.updated_at = now;
            return Ok(AlertUpsert {
                alert: existing.clone(),
                created: false,
            });
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            recipient_user_id,
            questionnaire_id,
            kind,
            message: message.to_string(),
            status: AlertStatus::Untreated,
            comment: None,
            treated_at: None,
            treated_by: None,
            created_at: now,
            updated_at: now,
        };
        inner.alerts.push(alert.clone());
        Ok(AlertUpsert {
            alert,
            created: true,
        })
    }

    async fn treat_alert(&self, alert_id: Uuid, by_user: Uuid) -> EngineResult<Option<Alert>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let Some(alert) = inner.alerts.iter_mut().find(|a| {
            a.id == alert_id
                && a.recipient_user_id == by_user
                && a.status == AlertStatus::Untreated
        }) else {
            return Ok(None);
        };

        alert.status = AlertStatus::Treated;
        alert.treated_at = Some(now);
        alert.treated_by = Some(by_user);
        alert.updated_at = now;
        Ok(Some(alert.clone()))
    }

    async fn annotate_alert(
        &self,
        alert_id: Uuid,
        by_user: Uuid,
        comment: &str,
    ) -> EngineResult<Option<Alert>> {
        let mut inner = self.inner.lock().await;

        let Some(alert) = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.recipient_user_id == by_user)
        else {
            return Ok(None);
        };

        alert.comment = Some(comment.to_string());
        alert.updated_at = Utc::now();
        Ok(Some(alert.clone()))
    }

    async fn create_notification(
        &self,
        recipient_user_id: Uuid,
        kind: AlertKind,
        title: &str,
        message: &str,
        questionnaire_id: Option<Uuid>,
    ) -> EngineResult<Notification> {
        let mut inner = self.inner.lock().await;
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_user_id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            questionnaire_id,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        inner.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn mark_notification_read(&self, id: Uuid, owner: Uuid) -> EngineResult<bool> {
        let mut inner = self.inner.lock().await;

        let Some(notification) = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.recipient_user_id == owner && !n.is_read)
        else {
            return Ok(false);
        };

        notification.is_read = true;
        notification.read_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_all_notifications_read(&self, owner: Uuid) -> EngineResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut changed = 0u64;

        for notification in inner
            .notifications
            .iter_mut()
            .filter(|n| n.recipient_user_id == owner && !n.is_read)
        {
            notification.is_read = true;
            notification.read_at = Some(now);
            changed += 1;
        }

        Ok(changed)
    }

    async fn count_unread_notifications(&self, user: Uuid) -> EngineResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.recipient_user_id == user && !n.is_read)
            .count() as i64)
    }

    async fn count_untreated_alerts(&self, user: Uuid) -> EngineResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.recipient_user_id == user && a.status == AlertStatus::Untreated)
            .count() as i64)
    }

    async fn list_notifications(
        &self,
        user: Uuid,
        is_read: Option<bool>,
    ) -> EngineResult<Vec<Notification>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.recipient_user_id == user)
            .filter(|n| is_read.map_or(true, |wanted| n.is_read == wanted))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn list_alerts(
        &self,
        user: Uuid,
        status: Option<AlertStatus>,
    ) -> EngineResult<Vec<Alert>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<Alert> = inner
            .alerts
            .iter()
            .filter(|a| a.recipient_user_id == user)
            .filter(|a| status.map_or(true, |wanted| a.status == wanted))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }
}
