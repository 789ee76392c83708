//! Dispatch orchestrator and result aggregation.
//!
//! One call to `Dispatcher::dispatch`:
//! 1. Claims the referenced schedule, if any
//! 2. Creates the `Notification`
//! 3. Spawns one task per (recipient, method) pair into a `JoinSet`
//! 4. Waits for every task to settle; a panicked task counts as a failure
//! 5. Aggregates counts and finalizes the schedule
//!
//! Only steps 1 and 2 can fail the call. Once the `Notification` exists the
//! caller always gets counts back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DeliveryStatus, NewNotification, NotificationType, Priority, Recipient,
};

use crate::channels::ChannelRegistry;
use crate::resolver::RecipientResolver;
use crate::schedule::ScheduleBridge;
use crate::store::{NotificationStore, ProfileStore};
use crate::template::TemplateRenderer;
use crate::tracker::{DeliveryOutcome, DeliveryTracker};

const DEFAULT_SUBJECT: &str = "Notification";
const DEFAULT_TARGET_AUDIENCE: &str = "custom";

/// Dispatch request as accepted by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub recipients: Vec<Recipient>,
    /// Method names as sent by the caller; unknown names fail per pair.
    pub delivery_methods: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub content: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, rename = "type")]
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub scheduled_id: Option<Uuid>,
    #[serde(default)]
    pub target_audience: Option<String>,
}

/// Aggregated result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub notification_id: Uuid,
    pub success_count: u32,
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_id: Option<Uuid>,
}

impl DispatchSummary {
    /// Count settled outcomes: `sent` is a success, anything else a failure.
    pub fn aggregate(
        notification_id: Uuid,
        outcomes: &[DeliveryOutcome],
        scheduled_id: Option<Uuid>,
    ) -> Self {
        let sent = outcomes
            .iter()
            .filter(|o| o.status == DeliveryStatus::Sent)
            .count();

        Self {
            notification_id,
            success_count: saturating_u32(sent),
            failure_count: saturating_u32(outcomes.len() - sent),
            scheduled_id,
        }
    }

    pub fn total(&self) -> u32 {
        self.success_count.saturating_add(self.failure_count)
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Fans a notification out to every (recipient, method) pair.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    resolver: Arc<RecipientResolver>,
    tracker: Arc<DeliveryTracker>,
    schedules: ScheduleBridge,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        profiles: Arc<dyn ProfileStore>,
        channels: ChannelRegistry,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            resolver: Arc::new(RecipientResolver::new(profiles)),
            tracker: Arc::new(DeliveryTracker::new(
                store.clone(),
                channels,
                delivery_timeout,
            )),
            schedules: ScheduleBridge::new(store.clone()),
            store,
        }
    }

    /// Delivery methods this dispatcher can send through.
    pub fn methods(&self) -> Vec<&'static str> {
        self.tracker.channels().methods()
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchSummary, AppError> {
        if request.content.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".to_string()));
        }

        let variables = Arc::new(request.variables.unwrap_or_default());
        let subject: Arc<str> = request
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string())
            .into();
        let content: Arc<str> = request.content.into();

        if let Some(scheduled_id) = request.scheduled_id {
            self.schedules.claim(scheduled_id).await?;
        }

        let header = TemplateRenderer::render_message(&subject, &content, &variables);
        let created = self
            .store
            .create_notification(&NewNotification {
                title: header.subject,
                content: header.content,
                notification_type: request.notification_type.unwrap_or_default(),
                priority: request.priority.unwrap_or_default(),
                target_audience: request
                    .target_audience
                    .unwrap_or_else(|| DEFAULT_TARGET_AUDIENCE.to_string()),
            })
            .await;

        let notification = match created {
            Ok(notification) => notification,
            Err(e) => {
                if let Some(scheduled_id) = request.scheduled_id {
                    self.schedules
                        .abandon(scheduled_id, format!("Notification not created: {}", e))
                        .await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            notification_id = %notification.id,
            recipients = request.recipients.len(),
            methods = request.delivery_methods.len(),
            scheduled_id = ?request.scheduled_id,
            "Notification created"
        );

        let mut tasks = JoinSet::new();
        for recipient in &request.recipients {
            for method in &request.delivery_methods {
                let resolver = self.resolver.clone();
                let tracker = self.tracker.clone();
                let recipient = recipient.clone();
                let method = method.clone();
                let subject = subject.clone();
                let content = content.clone();
                let variables = variables.clone();
                let notification_id = notification.id;

                tasks.spawn(async move {
                    let recipient = resolver.resolve(recipient).await.into_recipient();
                    let message = TemplateRenderer::render_message(&subject, &content, &variables);
                    tracker
                        .deliver(notification_id, &recipient, &method, &message)
                        .await
                });
            }
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Delivery task aborted"
                    );
                    outcomes.push(DeliveryOutcome::failed(
                        "unknown",
                        format!("Delivery task aborted: {}", e),
                    ));
                }
            }
        }

        let summary = DispatchSummary::aggregate(notification.id, &outcomes, request.scheduled_id);

        if let Some(scheduled_id) = request.scheduled_id {
            self.schedules
                .finish(scheduled_id, summary.failure_count)
                .await;
        }

        tracing::info!(
            notification_id = %summary.notification_id,
            success_count = summary.success_count,
            failure_count = summary.failure_count,
            "Notification dispatched"
        );

        Ok(summary)
    }
}
