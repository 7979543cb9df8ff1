use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::alert::channels::{read_success, transport_error, AlertChannel, ChannelContext};
use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct EmailChannel {
    client: Client,
    retry: RetryPolicy,
    api_base: String,
    api_key: String,
    from: String,
    to: Vec<String>,
}

impl EmailChannel {
    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        let to = recipients(&config.parameters);
        if to.is_empty() {
            return Err(ChannelError::Config(
                "email channel requires parameter 'to'".to_string(),
            ));
        }
        let api_key = config
            .param(&["apiKey"])
            .map(str::to_string)
            .or_else(|| ctx.email_api_key.clone())
            .ok_or_else(|| ChannelError::Config("email API key is not configured".to_string()))?;
        Ok(Self {
            client: ctx.client.clone(),
            retry: ctx.retry,
            api_base: config
                .param(&["apiBase"])
                .unwrap_or(ctx.email_api_base.as_str())
                .to_string(),
            api_key,
            from: config
                .param(&["from"])
                .unwrap_or(ctx.email_from.as_str())
                .to_string(),
            to,
        })
    }

    async fn post_once(&self, payload: &Value) -> Result<String, ChannelError> {
        let url = format!("{}/emails", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        read_success(response).await?;
        Ok(format!("email sent to {}", self.to.join(", ")))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        let payload = json!({
            "from": self.from,
            "to": self.to,
            "subject": message.email_subject(),
            "html": message.email_html(),
            "text": message.email_text(),
        });
        self.retry.run(|| self.post_once(&payload)).await
    }
}

fn recipients(parameters: &Value) -> Vec<String> {
    let raw = parameters.get("to").or_else(|| parameters.get("email"));
    let mut out: Vec<String> = match raw {
        Some(Value::String(list)) => list.split(',').map(|s| s.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };
    out.retain(|address| address.contains('@'));
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ctx(base: &str) -> ChannelContext {
        ChannelContext::new(Client::new(), RetryPolicy::new(3, Duration::from_millis(1))).with_email(
            base,
            Some("re_test".to_string()),
            "alerts@example.com",
        )
    }

    #[test]
    fn recipients_accept_lists_and_arrays() {
        assert_eq!(
            recipients(&json!({ "to": "a@x.io, b@x.io" })),
            vec!["a@x.io", "b@x.io"]
        );
        assert_eq!(recipients(&json!({ "email": ["c@x.io", "nope"] })), vec!["c@x.io"]);
        assert!(recipients(&json!({})).is_empty());
    }

    #[test]
    fn missing_recipient_is_config_error() {
        let config = AlertChannelConfig::new(ChannelType::Email, json!({}));
        let err = EmailChannel::from_config(&config, &ctx("http://unused")).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[tokio::test]
    async fn sends_html_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "e1" })))
            .expect(1)
            .mount(&server)
            .await;

        let config = AlertChannelConfig::new(ChannelType::Email, json!({ "to": "dev@shop.io" }));
        let channel = EmailChannel::from_config(&config, &ctx(&server.uri())).unwrap();
        let sent = channel.send(&AlertMessage::test("shop")).await.unwrap();
        assert_eq!(sent, "email sent to dev@shop.io");

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["to"], json!(["dev@shop.io"]));
        assert_eq!(body["from"], "alerts@example.com");
        assert!(body["html"].as_str().unwrap().contains("<h2>"));
        assert!(body["text"].as_str().is_some());
    }
}
