use async_trait::async_trait;
use reqwest::Client;

use crate::alert::channels::{read_success, transport_error, AlertChannel, ChannelContext};
use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    retry: RetryPolicy,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, ctx: &ChannelContext) -> Self {
        Self {
            client: ctx.client.clone(),
            retry: ctx.retry,
            url: url.into(),
        }
    }

    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        let url = config.require(&["webhookUrl", "url"])?;
        Ok(Self::new(url, ctx))
    }

    async fn post_once(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        let response = self
            .client
            .post(&self.url)
            .json(&message.chat_payload())
            .send()
            .await
            .map_err(transport_error)?;
        read_success(response).await?;
        Ok("delivered to incoming webhook".to_string())
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        self.retry.run(|| self.post_once(message)).await
    }
}
