//! In-memory stores for tests and local runs without PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    ContactInfo, DeliveryCompletion, DeliveryRecord, DeliveryStatus, NewDelivery,
    NewNotification, Notification, NotificationEvent, RecipientKind, ScheduleStatus,
    ScheduledNotification,
};

use crate::store::{NotificationStore, ProfileStore};

#[derive(Default)]
struct Tables {
    notifications: Vec<Notification>,
    deliveries: Vec<DeliveryRecord>,
    events: Vec<NotificationEvent>,
    schedules: HashMap<Uuid, ScheduledNotification>,
    schedule_history: HashMap<Uuid, Vec<ScheduleStatus>>,
}

/// `NotificationStore` backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    reject_notifications: AtomicBool,
    reject_completions: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_notification` fail, as a broken database would.
    pub fn reject_notifications(&self) {
        self.reject_notifications.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent `complete_delivery` fail.
    pub fn reject_completions(&self) {
        self.reject_completions.store(true, Ordering::SeqCst);
    }

    /// Register an externally created schedule in `pending` status.
    pub async fn insert_schedule(&self, id: Uuid) {
        let mut tables = self.tables.lock().await;
        tables.schedules.insert(
            id,
            ScheduledNotification {
                id,
                status: ScheduleStatus::Pending,
                sent_at: None,
                error_message: None,
            },
        );
        tables
            .schedule_history
            .insert(id, vec![ScheduleStatus::Pending]);
    }

    /// Every status the schedule has held, oldest first.
    pub async fn schedule_history(&self, id: Uuid) -> Vec<ScheduleStatus> {
        self.tables
            .lock()
            .await
            .schedule_history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.tables.lock().await.notifications.clone()
    }

    pub async fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.tables.lock().await.deliveries.clone()
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.tables.lock().await.events.clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification, AppError> {
        if self.reject_notifications.load(Ordering::SeqCst) {
            return Err(AppError::Internal(
                "notification store unavailable".to_string(),
            ));
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            title: new.title.clone(),
            content: new.content.clone(),
            notification_type: new.notification_type,
            priority: new.priority,
            target_audience: new.target_audience.clone(),
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(notification)
    }

    async fn create_delivery(&self, new: &NewDelivery) -> Result<DeliveryRecord, AppError> {
        let record = DeliveryRecord {
            id: Uuid::new_v4(),
            notification_id: new.notification_id,
            recipient_id: new.recipient_id,
            recipient_type: new.recipient_type,
            delivery_method: new.delivery_method.clone(),
            recipient_email: new.recipient_email.clone(),
            recipient_phone: new.recipient_phone.clone(),
            status: DeliveryStatus::Pending,
            sent_at: None,
            error_message: None,
            external_id: None,
            created_at: Utc::now(),
        };
        self.tables.lock().await.deliveries.push(record.clone());
        Ok(record)
    }

    async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        completion: &DeliveryCompletion,
    ) -> Result<bool, AppError> {
        if self.reject_completions.load(Ordering::SeqCst) {
            return Err(AppError::Internal("delivery store unavailable".to_string()));
        }

        let mut tables = self.tables.lock().await;
        let Some(record) = tables
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id && d.status == DeliveryStatus::Pending)
        else {
            return Ok(false);
        };

        record.status = completion.status;
        record.sent_at = completion.sent_at;
        record.external_id = completion.external_id.clone();
        record.error_message = completion.error_message.clone();
        Ok(true)
    }

    async fn append_event(
        &self,
        delivery_id: Uuid,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<NotificationEvent, AppError> {
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            delivery_id,
            event_type: event_type.to_string(),
            event_data,
            created_at: Utc::now(),
        };
        self.tables.lock().await.events.push(event.clone());
        Ok(event)
    }

    async fn find_schedule(&self, id: Uuid) -> Result<Option<ScheduledNotification>, AppError> {
        Ok(self.tables.lock().await.schedules.get(&id).cloned())
    }

    async fn transition_schedule(
        &self,
        id: Uuid,
        from: ScheduleStatus,
        to: ScheduleStatus,
        sent_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<bool, AppError> {
        if !from.can_transition_to(to) {
            return Err(AppError::Internal(format!(
                "Illegal schedule transition {} -> {}",
                from, to
            )));
        }

        let mut tables = self.tables.lock().await;
        let Some(schedule) = tables.schedules.get_mut(&id) else {
            return Ok(false);
        };
        if schedule.status != from {
            return Ok(false);
        }

        schedule.status = to;
        if sent_at.is_some() {
            schedule.sent_at = sent_at;
        }
        schedule.error_message = error_message;
        tables.schedule_history.entry(id).or_default().push(to);
        Ok(true)
    }
}

/// `ProfileStore` holding a fixed set of contacts.
#[derive(Default)]
pub struct MemoryProfileStore {
    contacts: HashMap<(RecipientKind, Uuid), ContactInfo>,
    unavailable: bool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A profile store whose every lookup errors.
    pub fn unavailable() -> Self {
        Self {
            contacts: HashMap::new(),
            unavailable: true,
        }
    }

    pub fn with_contact(mut self, kind: RecipientKind, id: Uuid, contact: ContactInfo) -> Self {
        self.contacts.insert((kind, id), contact);
        self
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_contact(
        &self,
        kind: RecipientKind,
        id: Uuid,
    ) -> Result<Option<ContactInfo>, AppError> {
        if self.unavailable {
            return Err(AppError::Internal("profile store unavailable".to_string()));
        }
        Ok(self.contacts.get(&(kind, id)).cloned())
    }
}
