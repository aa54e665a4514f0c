use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Positive,
    Negative,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Positive => "positive",
            AlertKind::Negative => "negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(AlertKind::Positive),
            "negative" => Some(AlertKind::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Untreated,
    Treated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Untreated => "untreated",
            AlertStatus::Treated => "treated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "untreated" => Some(AlertStatus::Untreated),
            "treated" => Some(AlertStatus::Treated),
            _ => None,
        }
    }
}

/// Selects which title label generated alerts carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionnaireType {
    During,
    After,
}

impl QuestionnaireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionnaireType::During => "during",
            QuestionnaireType::After => "after",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "during" => Some(QuestionnaireType::During),
            "after" => Some(QuestionnaireType::After),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QuestionnaireType::During => "during course",
            QuestionnaireType::After => "after course",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaffUser {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Questionnaire {
    pub id: Uuid,
    pub subject: String,
    pub kind: QuestionnaireType,
    pub owner_user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub id: Uuid,
    pub questionnaire_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub submitter: String,
    pub created_at: DateTime<Utc>,
}

/// Derived statistics over all responses for one questionnaire.
#[derive(Debug, Clone, Copy)]
pub struct AggregateSnapshot {
    pub response_count: i64,
    pub mean_rating: f64,
    pub questionnaire_type: QuestionnaireType,
}

/// Output of rule evaluation: a proposed alert, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertIntent {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    pub questionnaire_id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub status: AlertStatus,
    pub comment: Option<String>,
    pub treated_at: Option<DateTime<Utc>>,
    pub treated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub questionnaire_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Wire shape for live channel pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    NewAlert { data: Alert },
    NewNotification { data: Notification },
    UnreadCount { value: i64 },
    UntreatedAlertCount { value: i64 },
}
