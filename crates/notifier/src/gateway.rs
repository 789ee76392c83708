//! Email and SMS gateway clients.
//!
//! Adapters depend on the `EmailGateway` / `SmsGateway` traits and receive an
//! implementation at construction, so tests substitute fakes. The HTTP clients
//! here do a single authenticated request and surface the provider's error text.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

const RESEND_EMAILS_URL: &str = "https://api.resend.com/emails";
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error; the message is its own text.
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    /// Submit an email; returns the provider's message id.
    async fn send_email(&self, to: &str, subject: &str, html: &str)
    -> Result<String, GatewayError>;
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Submit a text message; returns the provider's message SID.
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, GatewayError>;
}

/// Provider error body; both Resend and Twilio put the text under `message`.
#[derive(Deserialize)]
struct ProviderError {
    message: Option<String>,
}

async fn rejection(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ProviderError>(&text)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), text));
    GatewayError::Rejected(message)
}

/// Resend HTTP API client.
pub struct ResendGateway {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendGateway {
    pub fn new(client: reqwest::Client, api_key: String, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailGateway for ResendGateway {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(RESEND_EMAILS_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: ResendResponse = response.json().await?;
        Ok(body.id)
    }
}

/// Twilio Messages API client.
pub struct TwilioGateway {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

#[derive(Deserialize)]
struct TwilioResponse {
    sid: String,
}

impl TwilioGateway {
    pub fn new(
        client: reqwest::Client,
        account_sid: String,
        auth_token: String,
        from: String,
    ) -> Self {
        Self {
            client,
            account_sid,
            auth_token,
            from,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.account_sid
        )
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let message: TwilioResponse = response.json().await?;
        Ok(message.sid)
    }
}
