pub mod bot;
pub mod email;
pub mod generic;
pub mod hybrid;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

pub use bot::BotChannel;
pub use email::EmailChannel;
pub use generic::GenericChannel;
pub use hybrid::HybridChannel;
pub use webhook::WebhookChannel;

pub const DEFAULT_BOT_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_EMAIL_API_BASE: &str = "https://api.resend.com";
pub const DEFAULT_EMAIL_FROM: &str = "breakwatch <alerts@breakwatch.dev>";

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError>;
}

#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub client: Client,
    pub retry: RetryPolicy,
    pub bot_api_base: String,
    pub email_api_base: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
}

impl ChannelContext {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            bot_api_base: DEFAULT_BOT_API_BASE.to_string(),
            email_api_base: DEFAULT_EMAIL_API_BASE.to_string(),
            email_api_key: None,
            email_from: DEFAULT_EMAIL_FROM.to_string(),
        }
    }

    pub fn with_bot_api_base(mut self, base: impl Into<String>) -> Self {
        self.bot_api_base = base.into();
        self
    }

    pub fn with_email(
        mut self,
        api_base: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
    ) -> Self {
        self.email_api_base = api_base.into();
        self.email_api_key = api_key;
        self.email_from = from.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub fn http_client(timeout: Duration, connect_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("breakwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
}

pub enum Channel {
    Bot(BotChannel),
    Webhook(WebhookChannel),
    Hybrid(HybridChannel),
    Email(EmailChannel),
    Generic(GenericChannel),
}

impl Channel {
    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        Ok(match config.channel_type {
            ChannelType::Bot => Self::Bot(BotChannel::from_config(config, ctx)?),
            ChannelType::Webhook => Self::Webhook(WebhookChannel::from_config(config, ctx)?),
            ChannelType::Hybrid => Self::Hybrid(HybridChannel::from_config(config, ctx)?),
            ChannelType::Email => Self::Email(EmailChannel::from_config(config, ctx)?),
            ChannelType::Generic => Self::Generic(GenericChannel::from_config(config, ctx)?),
        })
    }

    fn handler(&self) -> &dyn AlertChannel {
        match self {
            Self::Bot(channel) => channel,
            Self::Webhook(channel) => channel,
            Self::Hybrid(channel) => channel,
            Self::Email(channel) => channel,
            Self::Generic(channel) => channel,
        }
    }
}

#[async_trait]
impl AlertChannel for Channel {
    fn channel_type(&self) -> ChannelType {
        self.handler().channel_type()
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        self.handler().send(message).await
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> ChannelError {
    if err.is_builder() {
        ChannelError::Config(format!("invalid request: {err}"))
    } else {
        ChannelError::Transient(format!("request failed: {err}"))
    }
}

// 429 and 5xx are transient; any other non-success status is a configuration problem.
pub(crate) fn status_error(status: StatusCode, body: &str) -> ChannelError {
    let preview: String = body.chars().take(180).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), preview.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ChannelError::Transient(message)
    } else {
        ChannelError::Config(message)
    }
}

pub(crate) async fn read_success(response: Response) -> Result<String, ChannelError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(status_error(StatusCode::INTERNAL_SERVER_ERROR, "").is_retriable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retriable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retriable());
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "no such hook"),
            ChannelError::Config("HTTP 404: no such hook".to_string())
        );
    }
}
