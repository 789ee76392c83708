//! Dispatch pipeline tests against the in-memory store and fake gateways.
//!
//! ```bash
//! cargo test -p herald-notifier --test dispatch
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    ContactInfo, DeliveryMethod, DeliveryStatus, Recipient, RecipientKind, ScheduleStatus,
};
use herald_notifier::channels::{
    ChannelAdapter, ChannelRegistry, EmailAdapter, InAppAdapter, SendResult, SmsAdapter,
};
use herald_notifier::gateway::{EmailGateway, GatewayError, SmsGateway};
use herald_notifier::memory::{MemoryProfileStore, MemoryStore};
use herald_notifier::store::NotificationStore;
use herald_notifier::{DispatchRequest, Dispatcher};

// ============================================================
// Fakes
// ============================================================

/// Email gateway that records every message and fails for listed addresses.
#[derive(Default)]
struct RecordingEmailGateway {
    sent: Mutex<Vec<(String, String, String)>>,
    reject: Vec<String>,
}

#[async_trait]
impl EmailGateway for RecordingEmailGateway {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<String, GatewayError> {
        if self.reject.iter().any(|r| r == to) {
            return Err(GatewayError::Rejected(format!("Mailbox {} rejected", to)));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), subject.to_string(), html.to_string()));
        Ok(format!("email-{}", sent.len()))
    }
}

struct OkSmsGateway;

#[async_trait]
impl SmsGateway for OkSmsGateway {
    async fn send_sms(&self, _to: &str, _body: &str) -> Result<String, GatewayError> {
        Ok("SM0001".to_string())
    }
}

/// In-app stand-in that captures the rendered content it was handed.
#[derive(Default)]
struct CapturingInApp {
    contents: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelAdapter for CapturingInApp {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::InApp
    }

    fn address<'a>(&self, _recipient: &'a Recipient) -> Option<&'a str> {
        None
    }

    async fn send(&self, _address: &str, _subject: &str, content: &str) -> SendResult {
        self.contents.lock().unwrap().push(content.to_string());
        SendResult::sent(None)
    }
}

struct PanickingSms;

#[async_trait]
impl ChannelAdapter for PanickingSms {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Sms
    }

    fn address<'a>(&self, recipient: &'a Recipient) -> Option<&'a str> {
        recipient.phone.as_deref()
    }

    async fn send(&self, _: &str, _: &str, _: &str) -> SendResult {
        panic!("sms driver crashed");
    }
}

/// In-app stand-in that holds every send until `n` sends are in flight.
struct GatedInApp {
    gate: tokio::sync::Barrier,
}

#[async_trait]
impl ChannelAdapter for GatedInApp {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::InApp
    }

    fn address<'a>(&self, _recipient: &'a Recipient) -> Option<&'a str> {
        None
    }

    async fn send(&self, _: &str, _: &str, _: &str) -> SendResult {
        self.gate.wait().await;
        SendResult::sent(None)
    }
}

// ============================================================
// Helpers
// ============================================================

fn email_recipient(email: &str) -> Recipient {
    Recipient {
        kind: RecipientKind::User,
        id: None,
        email: Some(email.to_string()),
        phone: None,
    }
}

fn request(recipients: Vec<Recipient>, methods: &[&str], content: &str) -> DispatchRequest {
    DispatchRequest {
        recipients,
        delivery_methods: methods.iter().map(|m| m.to_string()).collect(),
        subject: None,
        content: content.to_string(),
        priority: None,
        notification_type: None,
        variables: None,
        scheduled_id: None,
        target_audience: None,
    }
}

fn standard_channels(email: Arc<RecordingEmailGateway>) -> ChannelRegistry {
    ChannelRegistry::new()
        .register(Arc::new(EmailAdapter::new(Some(email as Arc<dyn EmailGateway>))))
        .register(Arc::new(SmsAdapter::new(Some(Arc::new(OkSmsGateway)))))
        .register(Arc::new(InAppAdapter))
}

fn dispatcher(store: Arc<MemoryStore>, channels: ChannelRegistry) -> Dispatcher {
    Dispatcher::new(
        store,
        Arc::new(MemoryProfileStore::new()),
        channels,
        Duration::from_secs(5),
    )
}

// ============================================================
// Fan-out and aggregation
// ============================================================

#[tokio::test]
async fn test_one_record_per_recipient_and_method() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let recipients = vec![
        email_recipient("a@x.com"),
        email_recipient("b@x.com"),
        email_recipient("c@x.com"),
    ];
    let summary = dispatcher
        .dispatch(request(recipients, &["email", "sms", "in-app"], "Hello"))
        .await
        .unwrap();

    // 3 recipients × 3 methods; SMS fails for everyone (no phone numbers)
    assert_eq!(summary.total(), 9);
    assert_eq!(summary.success_count, 6);
    assert_eq!(summary.failure_count, 3);

    let deliveries = store.deliveries().await;
    assert_eq!(deliveries.len(), 9);
    assert!(deliveries.iter().all(|d| d.status.is_terminal()));
    assert!(
        deliveries
            .iter()
            .all(|d| d.notification_id == summary.notification_id)
    );

    let sms_errors: Vec<_> = deliveries
        .iter()
        .filter(|d| d.delivery_method == "sms")
        .map(|d| d.error_message.as_deref())
        .collect();
    assert_eq!(sms_errors, vec![Some("No phone number provided"); 3]);

    // One "sent" event per successful delivery
    assert_eq!(store.events().await.len(), 6);
}

#[tokio::test]
async fn test_empty_recipients_or_methods() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let no_recipients = dispatcher
        .dispatch(request(vec![], &["email"], "Hello"))
        .await
        .unwrap();
    assert_eq!((no_recipients.success_count, no_recipients.failure_count), (0, 0));

    let no_methods = dispatcher
        .dispatch(request(vec![email_recipient("a@x.com")], &[], "Hello"))
        .await
        .unwrap();
    assert_eq!((no_methods.success_count, no_methods.failure_count), (0, 0));

    assert_eq!(store.notifications().await.len(), 2);
    assert!(store.deliveries().await.is_empty());
}

#[tokio::test]
async fn test_rendered_content_reaches_every_channel() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let in_app = Arc::new(CapturingInApp::default());
    let channels = ChannelRegistry::new()
        .register(Arc::new(EmailAdapter::new(Some(email.clone() as Arc<dyn EmailGateway>))))
        .register(in_app.clone());
    let dispatcher = dispatcher(store.clone(), channels);

    let mut req = request(
        vec![email_recipient("a@x.com"), email_recipient("b@x.com")],
        &["email", "in-app"],
        "Hi {name}",
    );
    req.subject = Some("Welcome {name}".to_string());
    req.variables = Some(HashMap::from([("name".to_string(), "Ann".to_string())]));

    let summary = dispatcher.dispatch(req).await.unwrap();
    assert_eq!(summary.success_count, 4);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(store.deliveries().await.len(), 4);

    let sent = email.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    for (_, subject, content) in &sent {
        assert_eq!(subject, "Welcome Ann");
        assert_eq!(content, "Hi Ann");
    }
    assert_eq!(*in_app.contents.lock().unwrap(), vec!["Hi Ann", "Hi Ann"]);

    let notification = &store.notifications().await[0];
    assert_eq!(notification.title, "Welcome Ann");
    assert_eq!(notification.content, "Hi Ann");
}

#[tokio::test]
async fn test_unsupported_method_fails_only_its_pair() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let summary = dispatcher
        .dispatch(request(
            vec![email_recipient("a@x.com")],
            &["email", "pager", "in-app"],
            "Hello",
        ))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failure_count, 1);

    let deliveries = store.deliveries().await;
    let pager = deliveries
        .iter()
        .find(|d| d.delivery_method == "pager")
        .unwrap();
    assert_eq!(pager.status, DeliveryStatus::Failed);
    assert_eq!(
        pager.error_message.as_deref(),
        Some("Unsupported delivery method: pager")
    );
}

#[tokio::test]
async fn test_gateway_error_is_isolated_and_preserved() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway {
        reject: vec!["bad@x.com".to_string()],
        ..Default::default()
    });
    let dispatcher = dispatcher(store.clone(), standard_channels(email.clone()));

    let summary = dispatcher
        .dispatch(request(
            vec![email_recipient("bad@x.com"), email_recipient("good@x.com")],
            &["email"],
            "Hello",
        ))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);

    let deliveries = store.deliveries().await;
    let bad = deliveries
        .iter()
        .find(|d| d.recipient_email.as_deref() == Some("bad@x.com"))
        .unwrap();
    assert_eq!(bad.error_message.as_deref(), Some("Mailbox bad@x.com rejected"));

    let good = deliveries
        .iter()
        .find(|d| d.recipient_email.as_deref() == Some("good@x.com"))
        .unwrap();
    assert_eq!(good.status, DeliveryStatus::Sent);
    assert_eq!(good.external_id.as_deref(), Some("email-1"));
}

#[tokio::test]
async fn test_unconfigured_email_fails_but_in_app_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let channels = ChannelRegistry::new()
        .register(Arc::new(EmailAdapter::new(None)))
        .register(Arc::new(InAppAdapter));
    let dispatcher = dispatcher(store.clone(), channels);

    let summary = dispatcher
        .dispatch(request(
            vec![email_recipient("a@x.com"), email_recipient("b@x.com")],
            &["email", "in-app"],
            "Hello",
        ))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failure_count, 2);

    for delivery in store.deliveries().await {
        match delivery.delivery_method.as_str() {
            "in-app" => assert_eq!(delivery.status, DeliveryStatus::Sent),
            _ => assert_eq!(
                delivery.error_message.as_deref(),
                Some("Email service not configured")
            ),
        }
    }
}

#[tokio::test]
async fn test_panicking_task_counts_as_failure() {
    let store = Arc::new(MemoryStore::new());
    let channels = ChannelRegistry::new()
        .register(Arc::new(PanickingSms))
        .register(Arc::new(InAppAdapter));
    let dispatcher = dispatcher(store.clone(), channels);

    let mut recipient = email_recipient("a@x.com");
    recipient.phone = Some("+15550001111".to_string());

    let summary = dispatcher
        .dispatch(request(vec![recipient], &["sms", "in-app"], "Hello"))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
}

#[tokio::test]
async fn test_pairs_are_delivered_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let recipients: Vec<_> = ["a@x.com", "b@x.com", "c@x.com"]
        .into_iter()
        .map(email_recipient)
        .collect();
    let gated = Arc::new(GatedInApp {
        gate: tokio::sync::Barrier::new(recipients.len()),
    });
    let dispatcher = dispatcher(store.clone(), ChannelRegistry::new().register(gated));

    // Each send waits for all of its siblings, so this only finishes if they run together.
    let summary = tokio::time::timeout(
        Duration::from_secs(2),
        dispatcher.dispatch(request(recipients, &["in-app"], "Hello")),
    )
    .await
    .expect("deliveries did not run concurrently")
    .unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failure_count, 0);
}

// ============================================================
// Recipient resolution
// ============================================================

#[tokio::test]
async fn test_id_only_recipient_resolved_from_profiles() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let owner_id = Uuid::new_v4();
    let profiles = MemoryProfileStore::new().with_contact(
        RecipientKind::Owner,
        owner_id,
        ContactInfo {
            email: Some("owner@x.com".to_string()),
            phone: Some("+15550002222".to_string()),
        },
    );
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(profiles),
        standard_channels(email.clone()),
        Duration::from_secs(5),
    );

    let owner = Recipient {
        kind: RecipientKind::Owner,
        id: Some(owner_id),
        email: None,
        phone: None,
    };
    let summary = dispatcher
        .dispatch(request(vec![owner], &["email", "sms"], "Payout sent"))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 2);

    let deliveries = store.deliveries().await;
    assert!(deliveries.iter().all(|d| d.recipient_id == Some(owner_id)));
    assert!(
        deliveries
            .iter()
            .all(|d| d.recipient_email.as_deref() == Some("owner@x.com"))
    );
    assert_eq!(email.sent.lock().unwrap()[0].0, "owner@x.com");
}

#[tokio::test]
async fn test_unresolvable_recipient_fails_at_adapter() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(MemoryProfileStore::unavailable()),
        standard_channels(email),
        Duration::from_secs(5),
    );

    let stub = Recipient {
        kind: RecipientKind::Agent,
        id: Some(Uuid::new_v4()),
        email: None,
        phone: None,
    };
    let summary = dispatcher
        .dispatch(request(vec![stub], &["email", "in-app"], "Hello"))
        .await
        .unwrap();
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);

    let failed = store
        .deliveries()
        .await
        .into_iter()
        .find(|d| d.status == DeliveryStatus::Failed)
        .unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("No email address provided"));
}

// ============================================================
// Hard failures
// ============================================================

#[tokio::test]
async fn test_notification_insert_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.reject_notifications();
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let result = dispatcher
        .dispatch(request(vec![email_recipient("a@x.com")], &["email"], "Hello"))
        .await;
    assert!(result.is_err());
    assert!(store.deliveries().await.is_empty());
}

#[tokio::test]
async fn test_notification_insert_failure_fails_claimed_schedule() {
    let store = Arc::new(MemoryStore::new());
    store.reject_notifications();
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));
    let scheduled_id = Uuid::new_v4();
    store.insert_schedule(scheduled_id).await;

    let mut req = request(vec![email_recipient("a@x.com")], &["email"], "Hello");
    req.scheduled_id = Some(scheduled_id);
    assert!(dispatcher.dispatch(req).await.is_err());

    assert_eq!(
        store.schedule_history(scheduled_id).await,
        vec![
            ScheduleStatus::Pending,
            ScheduleStatus::Processing,
            ScheduleStatus::Failed
        ]
    );
    let schedule = store.find_schedule(scheduled_id).await.unwrap().unwrap();
    assert!(schedule.error_message.unwrap().starts_with("Notification not created"));
}

#[tokio::test]
async fn test_empty_content_rejected() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let result = dispatcher
        .dispatch(request(vec![email_recipient("a@x.com")], &["email"], "   "))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(store.notifications().await.is_empty());
}

// ============================================================
// Scheduled notifications
// ============================================================

#[tokio::test]
async fn test_schedule_sent_when_all_deliveries_succeed() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));
    let scheduled_id = Uuid::new_v4();
    store.insert_schedule(scheduled_id).await;

    let mut req = request(vec![email_recipient("a@x.com")], &["email", "in-app"], "Hello");
    req.scheduled_id = Some(scheduled_id);

    let summary = dispatcher.dispatch(req).await.unwrap();
    assert_eq!(summary.scheduled_id, Some(scheduled_id));
    assert_eq!(summary.failure_count, 0);
    assert_eq!(
        store.schedule_history(scheduled_id).await,
        vec![
            ScheduleStatus::Pending,
            ScheduleStatus::Processing,
            ScheduleStatus::Sent
        ]
    );
}

#[tokio::test]
async fn test_schedule_failed_when_any_delivery_fails() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));
    let scheduled_id = Uuid::new_v4();
    store.insert_schedule(scheduled_id).await;

    // in-app succeeds, sms fails: a partially successful batch is still failed
    let mut req = request(vec![email_recipient("a@x.com")], &["sms", "in-app"], "Hello");
    req.scheduled_id = Some(scheduled_id);

    let summary = dispatcher.dispatch(req).await.unwrap();
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(
        store.schedule_history(scheduled_id).await,
        vec![
            ScheduleStatus::Pending,
            ScheduleStatus::Processing,
            ScheduleStatus::Failed
        ]
    );

    let schedule = store.find_schedule(scheduled_id).await.unwrap().unwrap();
    assert_eq!(schedule.error_message.as_deref(), Some("1 delivery failures"));
    assert!(schedule.sent_at.is_none());
}

#[tokio::test]
async fn test_schedule_already_processing_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));
    let scheduled_id = Uuid::new_v4();
    store.insert_schedule(scheduled_id).await;

    let mut first = request(vec![email_recipient("a@x.com")], &["in-app"], "Hello");
    first.scheduled_id = Some(scheduled_id);
    dispatcher.dispatch(first.clone()).await.unwrap();

    let second = dispatcher.dispatch(first).await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    // The rejected dispatch wrote nothing
    assert_eq!(store.notifications().await.len(), 1);
    assert_eq!(store.deliveries().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_schedule_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingEmailGateway::default());
    let dispatcher = dispatcher(store.clone(), standard_channels(email));

    let mut req = request(vec![email_recipient("a@x.com")], &["in-app"], "Hello");
    req.scheduled_id = Some(Uuid::new_v4());

    let result = dispatcher.dispatch(req).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(store.notifications().await.is_empty());
    assert!(store.deliveries().await.is_empty());
}
