//! Persistence seams for the dispatch pipeline.
//!
//! `NotificationStore` owns the notification, delivery, event and schedule rows;
//! `ProfileStore` answers contact lookups for the recipient resolver. `PgStore`
//! implements both on top of PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    ContactInfo, DeliveryCompletion, DeliveryRecord, DeliveryStatus, NewDelivery,
    NewNotification, Notification, NotificationEvent, RecipientKind, ScheduleStatus,
    ScheduledNotification,
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification, AppError>;

    /// Insert a delivery record in `pending` status.
    async fn create_delivery(&self, new: &NewDelivery) -> Result<DeliveryRecord, AppError>;

    /// Move a pending delivery to its terminal status.
    ///
    /// Returns `false` if the record was not pending (already terminal or missing).
    async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        completion: &DeliveryCompletion,
    ) -> Result<bool, AppError>;

    async fn append_event(
        &self,
        delivery_id: Uuid,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<NotificationEvent, AppError>;

    async fn find_schedule(&self, id: Uuid) -> Result<Option<ScheduledNotification>, AppError>;

    /// Conditionally move a schedule from `from` to `to`.
    ///
    /// Returns `true` only if the row was in `from` and has been updated.
    async fn transition_schedule(
        &self,
        id: Uuid,
        from: ScheduleStatus,
        to: ScheduleStatus,
        sent_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_contact(
        &self,
        kind: RecipientKind,
        id: Uuid,
    ) -> Result<Option<ContactInfo>, AppError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            INSERT INTO notifications (id, title, content, type, priority, target_audience, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.notification_type.to_string())
        .bind(new.priority.to_string())
        .bind(&new.target_audience)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn create_delivery(&self, new: &NewDelivery) -> Result<DeliveryRecord, AppError> {
        let record: DeliveryRecord = sqlx::query_as(
            r#"
            INSERT INTO notification_deliveries
                (id, notification_id, recipient_id, recipient_type, delivery_method,
                 recipient_email, recipient_phone, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.notification_id)
        .bind(new.recipient_id)
        .bind(new.recipient_type.to_string())
        .bind(&new.delivery_method)
        .bind(&new.recipient_email)
        .bind(&new.recipient_phone)
        .bind(DeliveryStatus::Pending.to_string())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        completion: &DeliveryCompletion,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = $1, sent_at = $2, external_id = $3, error_message = $4
            WHERE id = $5 AND status = 'pending'
            "#,
        )
        .bind(completion.status.to_string())
        .bind(completion.sent_at)
        .bind(&completion.external_id)
        .bind(&completion.error_message)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_event(
        &self,
        delivery_id: Uuid,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<NotificationEvent, AppError> {
        let event: NotificationEvent = sqlx::query_as(
            r#"
            INSERT INTO notification_events (id, delivery_id, event_type, event_data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(delivery_id)
        .bind(event_type)
        .bind(&event_data)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(event)
    }

    async fn find_schedule(&self, id: Uuid) -> Result<Option<ScheduledNotification>, AppError> {
        let schedule: Option<ScheduledNotification> = sqlx::query_as(
            "SELECT id, status, sent_at, error_message FROM scheduled_notifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(schedule)
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

        let result = sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET status = $1,
                sent_at = COALESCE($2, sent_at),
                error_message = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(to.to_string())
        .bind(sent_at)
        .bind(error_message)
        .bind(id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_contact(
        &self,
        kind: RecipientKind,
        id: Uuid,
    ) -> Result<Option<ContactInfo>, AppError> {
        let sql = match kind {
            RecipientKind::User => "SELECT email, phone FROM profiles WHERE id = $1",
            RecipientKind::Agent => "SELECT email, phone FROM agents WHERE id = $1",
            RecipientKind::Owner => "SELECT email, phone FROM owners WHERE id = $1",
        };

        let contact: Option<ContactInfo> = sqlx::query_as(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(contact)
    }
}
