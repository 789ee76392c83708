//! Channel adapters, one `ChannelAdapter` per delivery method.
//!
//! Adapters never return `Err`: every failure mode (missing address, missing
//! credential, gateway error) is reported as an unsuccessful `SendResult` so the
//! delivery tracker can record it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use herald_common::config::AppConfig;
use herald_common::types::{DeliveryMethod, Recipient, UnsupportedMethod};

use crate::gateway::{EmailGateway, ResendGateway, SmsGateway, TwilioGateway};

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    /// Provider message identifier, when the channel has one.
    pub external_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(external_id: Option<String>) -> Self {
        Self {
            success: true,
            external_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The delivery method this adapter serves.
    fn method(&self) -> DeliveryMethod;

    /// The recipient's address on this channel, if known.
    fn address<'a>(&self, recipient: &'a Recipient) -> Option<&'a str>;

    async fn send(&self, address: &str, subject: &str, content: &str) -> SendResult;
}

pub struct EmailAdapter {
    gateway: Option<Arc<dyn EmailGateway>>,
}

impl EmailAdapter {
    /// `None` means the email credential is not configured.
    pub fn new(gateway: Option<Arc<dyn EmailGateway>>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Email
    }

    fn address<'a>(&self, recipient: &'a Recipient) -> Option<&'a str> {
        recipient.email.as_deref()
    }

    async fn send(&self, address: &str, subject: &str, content: &str) -> SendResult {
        if address.trim().is_empty() {
            return SendResult::failed("No email address provided");
        }
        let Some(gateway) = &self.gateway else {
            return SendResult::failed("Email service not configured");
        };

        match gateway.send_email(address, subject, content).await {
            Ok(id) => SendResult::sent(Some(id)),
            Err(e) => SendResult::failed(e.to_string()),
        }
    }
}

pub struct SmsAdapter {
    gateway: Option<Arc<dyn SmsGateway>>,
}

impl SmsAdapter {
    /// `None` means the SMS credential is not configured.
    pub fn new(gateway: Option<Arc<dyn SmsGateway>>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Sms
    }

    fn address<'a>(&self, recipient: &'a Recipient) -> Option<&'a str> {
        recipient.phone.as_deref()
    }

    // Text messages carry the content only; the subject has no slot on this channel.
    async fn send(&self, address: &str, _subject: &str, content: &str) -> SendResult {
        if address.trim().is_empty() {
            return SendResult::failed("No phone number provided");
        }
        let Some(gateway) = &self.gateway else {
            return SendResult::failed("SMS service not configured");
        };

        match gateway.send_sms(address, content).await {
            Ok(sid) => SendResult::sent(Some(sid)),
            Err(e) => SendResult::failed(e.to_string()),
        }
    }
}

/// In-app delivery. Storing the in-app message belongs to the UI backend; this
/// adapter only acknowledges so the UI can render immediately.
pub struct InAppAdapter;

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::InApp
    }

    fn address<'a>(&self, _recipient: &'a Recipient) -> Option<&'a str> {
        None
    }

    async fn send(&self, _address: &str, _subject: &str, _content: &str) -> SendResult {
        SendResult::sent(None)
    }
}

/// Adapters keyed by the delivery method they serve.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<DeliveryMethod, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same method.
    pub fn register(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.method(), adapter);
        self
    }

    /// Build the standard Email / SMS / In-App set from configuration.
    ///
    /// A gateway is only constructed when its credential is present.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let email = config.resend_api_key.as_ref().map(|key| {
            Arc::new(ResendGateway::new(
                client.clone(),
                key.clone(),
                config.email_from.clone(),
            )) as Arc<dyn EmailGateway>
        });
        let sms = config.twilio_credentials().map(|(sid, token, from)| {
            Arc::new(TwilioGateway::new(
                client.clone(),
                sid.to_string(),
                token.to_string(),
                from.to_string(),
            )) as Arc<dyn SmsGateway>
        });

        if email.is_none() {
            tracing::warn!("RESEND_API_KEY not set, email deliveries will fail");
        }
        if sms.is_none() {
            tracing::warn!("Twilio credentials not set, SMS deliveries will fail");
        }

        Self::new()
            .register(Arc::new(EmailAdapter::new(email)))
            .register(Arc::new(SmsAdapter::new(sms)))
            .register(Arc::new(InAppAdapter))
    }

    /// Look up the adapter for a requested method name.
    pub fn get(&self, method: &str) -> Result<Arc<dyn ChannelAdapter>, UnsupportedMethod> {
        let parsed: DeliveryMethod = method.parse()?;
        self.adapters
            .get(&parsed)
            .cloned()
            .ok_or_else(|| UnsupportedMethod(method.to_string()))
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.adapters.keys().map(|m| m.as_str()).collect();
        methods.sort_unstable();
        methods
    }
}
