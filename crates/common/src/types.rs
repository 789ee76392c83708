use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification category shown to the recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Info => write!(f, "info"),
            NotificationType::Warning => write!(f, "warning"),
            NotificationType::Error => write!(f, "error"),
            NotificationType::Success => write!(f, "success"),
        }
    }
}

/// Notification priority levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Which kind of account a recipient refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RecipientKind {
    User,
    Agent,
    Owner,
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientKind::User => write!(f, "user"),
            RecipientKind::Agent => write!(f, "agent"),
            RecipientKind::Owner => write!(f, "owner"),
        }
    }
}

/// Delivery channel for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMethod {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "in-app")]
    InApp,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Sms => "sms",
            DeliveryMethod::InApp => "in-app",
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery method name no adapter serves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported delivery method: {0}")]
pub struct UnsupportedMethod(pub String);

impl FromStr for DeliveryMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(DeliveryMethod::Email),
            "sms" => Ok(DeliveryMethod::Sms),
            "in-app" => Ok(DeliveryMethod::InApp),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

/// Delivery attempt status. Moves `pending → sent | failed` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of an externally owned scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl ScheduleStatus {
    /// Only `pending → processing` and `processing → sent | failed` are legal.
    pub fn can_transition_to(&self, next: ScheduleStatus) -> bool {
        matches!(
            (self, next),
            (ScheduleStatus::Pending, ScheduleStatus::Processing)
                | (ScheduleStatus::Processing, ScheduleStatus::Sent)
                | (ScheduleStatus::Processing, ScheduleStatus::Failed)
        )
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Pending => write!(f, "pending"),
            ScheduleStatus::Processing => write!(f, "processing"),
            ScheduleStatus::Sent => write!(f, "sent"),
            ScheduleStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One logical message, created once per dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub target_audience: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a `Notification`.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub content: String,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub target_audience: String,
}

/// A transient recipient as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "type")]
    pub kind: RecipientKind,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Recipient {
    pub fn has_full_contact(&self) -> bool {
        self.email.is_some() && self.phone.is_some()
    }
}

/// Contact fields held by the profile store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// The tracked outcome of one (recipient, delivery method) pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub recipient_type: RecipientKind,
    /// Method name exactly as requested; unsupported names are recorded too.
    pub delivery_method: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a pending `DeliveryRecord`.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub notification_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub recipient_type: RecipientKind,
    pub delivery_method: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
}

/// Terminal state written to a delivery record after the send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCompletion {
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
}

/// Append-only audit entry for a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A scheduled notification row. Created and deleted elsewhere; only its status moves here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub status: ScheduleStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
