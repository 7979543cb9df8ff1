use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::alert::channels::{read_success, transport_error, AlertChannel, ChannelContext};
use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

// Chat API error codes that mean the bot lacks access. Retrying or falling back
// to another destination cannot fix these.
pub const PERMISSION_ERRORS: &[&str] = &[
    "missing_scope",
    "not_in_channel",
    "channel_not_found",
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "is_archived",
    "token_revoked",
];

const TRANSIENT_ERRORS: &[&str] = &[
    "ratelimited",
    "rate_limited",
    "internal_error",
    "fatal_error",
    "service_unavailable",
    "request_timeout",
];

pub fn classify_api_error(code: &str) -> ChannelError {
    if PERMISSION_ERRORS.contains(&code) {
        ChannelError::Permission(code.to_string())
    } else if TRANSIENT_ERRORS.contains(&code) {
        ChannelError::Transient(code.to_string())
    } else {
        ChannelError::Config(code.to_string())
    }
}

// A rejected token is a permission problem, not a bad config: the hybrid
// channel must not fall back on it.
fn auth_rejection(status: StatusCode, err: ChannelError) -> ChannelError {
    match (status, err) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, ChannelError::Config(message)) => {
            ChannelError::Permission(message)
        }
        (_, err) => err,
    }
}

#[derive(Debug, Clone)]
pub struct BotChannel {
    client: Client,
    retry: RetryPolicy,
    api_base: String,
    token: String,
    channel: String,
}

impl BotChannel {
    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            client: ctx.client.clone(),
            retry: ctx.retry,
            api_base: config
                .param(&["apiBase"])
                .unwrap_or(ctx.bot_api_base.as_str())
                .to_string(),
            token: config.require(&["botToken", "token"])?.to_string(),
            channel: config.require(&["channel", "channelId"])?.to_string(),
        })
    }

    pub fn from_hybrid(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Option<Self> {
        let token = config.param(&["botToken", "token"])?;
        let channel = config.param(&["channel", "channelId"])?;
        Some(Self {
            client: ctx.client.clone(),
            retry: ctx.retry,
            api_base: config
                .param(&["apiBase"])
                .unwrap_or(ctx.bot_api_base.as_str())
                .to_string(),
            token: token.to_string(),
            channel: channel.to_string(),
        })
    }

    async fn post_once(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        let url = format!("{}/chat.postMessage", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "channel": self.channel,
                "text": message.plain_text(),
                "blocks": message.blocks(),
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = read_success(response)
            .await
            .map_err(|err| auth_rejection(status, err))?;
        let reply: Value = serde_json::from_str(&body)
            .map_err(|e| ChannelError::Transient(format!("unreadable chat API reply: {e}")))?;
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            debug!(channel = %self.channel, "bot message posted");
            return Ok(format!("posted to {}", self.channel));
        }
        let code = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        Err(classify_api_error(code))
    }
}

#[async_trait]
impl AlertChannel for BotChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Bot
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        self.retry.run(|| self.post_once(message)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ctx(base: &str) -> ChannelContext {
        ChannelContext::new(Client::new(), RetryPolicy::new(3, Duration::from_millis(1)))
            .with_bot_api_base(base)
    }

    fn config() -> AlertChannelConfig {
        AlertChannelConfig::new(
            ChannelType::Bot,
            json!({ "botToken": "xoxb-1", "channel": "C123" }),
        )
    }

    #[test]
    fn error_codes_are_classified() {
        assert!(matches!(classify_api_error("not_in_channel"), ChannelError::Permission(_)));
        assert!(matches!(classify_api_error("ratelimited"), ChannelError::Transient(_)));
        assert!(matches!(classify_api_error("invalid_blocks"), ChannelError::Config(_)));
    }

    #[test]
    fn channel_id_is_required() {
        let config = AlertChannelConfig::new(ChannelType::Bot, json!({ "botToken": "x" }));
        let err = BotChannel::from_config(&config, &ctx("http://unused")).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[tokio::test]
    async fn posts_blocks_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-1"))
            .and(body_partial_json(json!({ "channel": "C123" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BotChannel::from_config(&config(), &ctx(&server.uri())).unwrap();
        let sent = channel.send(&AlertMessage::test("shop")).await.unwrap();
        assert_eq!(sent, "posted to C123");
    }

    #[tokio::test]
    async fn permission_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "missing_scope" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let channel = BotChannel::from_config(&config(), &ctx(&server.uri())).unwrap();
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert_eq!(err, ChannelError::Permission("missing_scope".to_string()));
    }

    #[tokio::test]
    async fn rejected_token_status_is_a_permission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BotChannel::from_config(&config(), &ctx(&server.uri())).unwrap();
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert_eq!(
            err,
            ChannelError::Permission("HTTP 401: invalid token".to_string())
        );
    }

    #[tokio::test]
    async fn rate_limits_are_retried_up_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let channel = BotChannel::from_config(&config(), &ctx(&server.uri())).unwrap();
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
