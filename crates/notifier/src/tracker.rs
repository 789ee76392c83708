//! Delivery tracker. Owns the lifecycle of one `DeliveryRecord`.
//!
//! 1. Insert the record as `pending`
//! 2. Send through the channel adapter (bounded by the delivery timeout)
//! 3. Finalize to `sent` or `failed`
//! 4. On success, append a `sent` event carrying the provider id

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use herald_common::types::{DeliveryCompletion, DeliveryStatus, NewDelivery, Recipient};

use crate::channels::{ChannelRegistry, SendResult};
use crate::store::NotificationStore;
use crate::template::RenderedMessage;

/// Event type appended after a successful send.
pub const EVENT_SENT: &str = "sent";

/// Settled result of one (recipient, method) task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// `None` when the pending record could not be created.
    pub delivery_id: Option<Uuid>,
    pub method: String,
    pub status: DeliveryStatus,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    /// Outcome for a task that ended before reaching the tracker's result.
    pub fn failed(method: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            delivery_id: None,
            method: method.into(),
            status: DeliveryStatus::Failed,
            external_id: None,
            error: Some(error.into()),
        }
    }
}

pub struct DeliveryTracker {
    store: Arc<dyn NotificationStore>,
    channels: ChannelRegistry,
    timeout: Duration,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn NotificationStore>, channels: ChannelRegistry, timeout: Duration) -> Self {
        Self {
            store,
            channels,
            timeout,
        }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Deliver one rendered message to one recipient over one method.
    ///
    /// Never returns an error; every failure ends in a `failed` outcome.
    pub async fn deliver(
        &self,
        notification_id: Uuid,
        recipient: &Recipient,
        method: &str,
        message: &RenderedMessage,
    ) -> DeliveryOutcome {
        let new = NewDelivery {
            notification_id,
            recipient_id: recipient.id,
            recipient_type: recipient.kind,
            delivery_method: method.to_string(),
            recipient_email: recipient.email.clone(),
            recipient_phone: recipient.phone.clone(),
        };

        let record = match self.store.create_delivery(&new).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    notification_id = %notification_id,
                    method,
                    error = %e,
                    "Failed to create delivery record"
                );
                return DeliveryOutcome::failed(method, e.to_string());
            }
        };

        let result = self.send(recipient, method, message).await;

        let completion = if result.success {
            DeliveryCompletion {
                status: DeliveryStatus::Sent,
                sent_at: Some(Utc::now()),
                external_id: result.external_id.clone(),
                error_message: None,
            }
        } else {
            DeliveryCompletion {
                status: DeliveryStatus::Failed,
                sent_at: None,
                external_id: None,
                error_message: result.error.clone(),
            }
        };

        // The outcome reports what the record holds, not what the adapter said.
        let finalize_error = match self.store.complete_delivery(record.id, &completion).await {
            Ok(true) => None,
            Ok(false) => {
                tracing::warn!(
                    delivery_id = %record.id,
                    "Delivery record was no longer pending, status left unchanged"
                );
                Some("Delivery record was no longer pending".to_string())
            }
            Err(e) => {
                tracing::error!(
                    delivery_id = %record.id,
                    error = %e,
                    "Failed to finalize delivery record"
                );
                Some(e.to_string())
            }
        };

        if let Some(error) = finalize_error {
            return DeliveryOutcome {
                delivery_id: Some(record.id),
                method: method.to_string(),
                status: DeliveryStatus::Failed,
                external_id: result.external_id,
                error: Some(error),
            };
        }

        if result.success {
            let data = json!({ "external_id": result.external_id });
            if let Err(e) = self.store.append_event(record.id, EVENT_SENT, data).await {
                tracing::error!(delivery_id = %record.id, error = %e, "Failed to append delivery event");
            }
            tracing::info!(
                notification_id = %notification_id,
                delivery_id = %record.id,
                method,
                external_id = ?result.external_id,
                "Delivery sent"
            );
        } else {
            tracing::warn!(
                notification_id = %notification_id,
                delivery_id = %record.id,
                method,
                error = ?result.error,
                "Delivery failed"
            );
        }

        DeliveryOutcome {
            delivery_id: Some(record.id),
            method: method.to_string(),
            status: completion.status,
            external_id: completion.external_id,
            error: completion.error_message,
        }
    }

    async fn send(&self, recipient: &Recipient, method: &str, message: &RenderedMessage) -> SendResult {
        let adapter = match self.channels.get(method) {
            Ok(adapter) => adapter,
            Err(e) => return SendResult::failed(e.to_string()),
        };
        let address = adapter.address(recipient).unwrap_or_default();

        match tokio::time::timeout(
            self.timeout,
            adapter.send(address, &message.subject, &message.content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => SendResult::failed(format!("Delivery timed out after {:?}", self.timeout)),
        }
    }
}
