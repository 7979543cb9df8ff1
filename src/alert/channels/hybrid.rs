use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::alert::channels::{AlertChannel, BotChannel, ChannelContext, WebhookChannel};
use crate::alert::message::AlertMessage;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct HybridChannel {
    bot: Option<BotChannel>,
    webhook: Option<WebhookChannel>,
    fallback: bool,
}

impl HybridChannel {
    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        let bot = BotChannel::from_hybrid(config, ctx);
        let webhook = config
            .param(&["webhookUrl"])
            .map(|url| WebhookChannel::new(url, ctx));
        if bot.is_none() && webhook.is_none() {
            return Err(ChannelError::Config(
                "hybrid channel requires a bot token and channel, or 'webhookUrl'".to_string(),
            ));
        }
        let fallback = config
            .parameters
            .get("fallback")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Self {
            bot,
            webhook,
            fallback,
        })
    }
}

#[async_trait]
impl AlertChannel for HybridChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Hybrid
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        match (&self.bot, &self.webhook) {
            (Some(bot), Some(webhook)) => match bot.send(message).await {
                Ok(sent) => Ok(sent),
                Err(err @ ChannelError::Permission(_)) => Err(err),
                Err(err) if self.fallback => {
                    warn!(error = %err, "bot delivery failed, falling back to webhook");
                    webhook
                        .send(message)
                        .await
                        .map(|sent| format!("{sent} (bot failed: {err})"))
                }
                Err(err) => Err(err),
            },
            (Some(bot), None) => bot.send(message).await,
            (None, Some(webhook)) => webhook.send(message).await,
            (None, None) => Err(ChannelError::Config(
                "hybrid channel has no destination".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::alert::retry::RetryPolicy;

    async fn setup(bot_reply: ResponseTemplate, webhook_calls: u64) -> (MockServer, HybridChannel) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .respond_with(bot_reply)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(webhook_calls)
            .mount(&server)
            .await;

        let ctx = ChannelContext::new(Client::new(), RetryPolicy::new(2, Duration::from_millis(1)))
            .with_bot_api_base(format!("{}/api", server.uri()));
        let config = AlertChannelConfig::new(
            ChannelType::Hybrid,
            json!({
                "botToken": "xoxb-1",
                "channel": "C1",
                "webhookUrl": format!("{}/hook", server.uri()),
            }),
        );
        let channel = HybridChannel::from_config(&config, &ctx).unwrap();
        (server, channel)
    }

    #[tokio::test]
    async fn falls_back_to_webhook_on_transient_bot_failure() {
        let (_server, channel) = setup(ResponseTemplate::new(503), 1).await;
        let sent = channel.send(&AlertMessage::test("shop")).await.unwrap();
        assert!(sent.starts_with("delivered to incoming webhook"));
    }

    #[tokio::test]
    async fn permission_error_skips_fallback() {
        let reply = ResponseTemplate::new(200)
            .set_body_json(json!({ "ok": false, "error": "not_in_channel" }));
        let (_server, channel) = setup(reply, 0).await;
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert_eq!(err, ChannelError::Permission("not_in_channel".to_string()));
    }

    #[tokio::test]
    async fn forbidden_bot_status_skips_fallback() {
        let (_server, channel) = setup(ResponseTemplate::new(403), 0).await;
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Permission(_)));
    }

    #[tokio::test]
    async fn bot_success_skips_webhook() {
        let reply = ResponseTemplate::new(200).set_body_json(json!({ "ok": true }));
        let (_server, channel) = setup(reply, 0).await;
        assert_eq!(
            channel.send(&AlertMessage::test("shop")).await.unwrap(),
            "posted to C1"
        );
    }

    #[test]
    fn needs_some_destination() {
        let ctx = ChannelContext::new(Client::new(), RetryPolicy::none());
        let config = AlertChannelConfig::new(ChannelType::Hybrid, json!({ "channel": "C1" }));
        assert!(matches!(
            HybridChannel::from_config(&config, &ctx),
            Err(ChannelError::Config(_))
        ));
    }
}
