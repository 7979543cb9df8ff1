use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::alert::channels::{read_success, transport_error, AlertChannel, ChannelContext};
use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, ChannelType};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct GenericChannel {
    client: Client,
    retry: RetryPolicy,
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
}

impl GenericChannel {
    pub fn from_config(
        config: &AlertChannelConfig,
        ctx: &ChannelContext,
    ) -> Result<Self, ChannelError> {
        let url = config.require(&["url", "webhookUrl"])?.to_string();
        let method = match config
            .param(&["method"])
            .map(str::to_ascii_uppercase)
            .as_deref()
        {
            None | Some("POST") => Method::POST,
            Some("PUT") => Method::PUT,
            Some("PATCH") => Method::PATCH,
            Some(other) => {
                return Err(ChannelError::Config(format!(
                    "unsupported generic webhook method '{other}'"
                )))
            }
        };
        let headers = match config.parameters.get("headers") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|value| (name.clone(), value.to_string()))
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            client: ctx.client.clone(),
            retry: ctx.retry,
            url,
            method,
            headers,
        })
    }

    async fn request_once(&self, envelope: &Value) -> Result<String, ChannelError> {
        let mut request = self.client.request(self.method.clone(), &self.url).json(envelope);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        read_success(response).await?;
        Ok(format!("{} {} -> {}", self.method, self.url, status.as_u16()))
    }
}

#[async_trait]
impl AlertChannel for GenericChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Generic
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, ChannelError> {
        let envelope = message.envelope();
        self.retry.run(|| self.request_once(&envelope)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ctx() -> ChannelContext {
        ChannelContext::new(Client::new(), RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn rejects_unknown_method() {
        let config = AlertChannelConfig::new(
            ChannelType::Generic,
            json!({ "url": "http://x", "method": "DELETE" }),
        );
        assert!(matches!(
            GenericChannel::from_config(&config, &ctx()),
            Err(ChannelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn puts_envelope_with_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/events"))
            .and(header("x-api-key", "k1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let config = AlertChannelConfig::new(
            ChannelType::Generic,
            json!({
                "url": format!("{}/events", server.uri()),
                "method": "put",
                "headers": { "x-api-key": "k1" }
            }),
        );
        let channel = GenericChannel::from_config(&config, &ctx()).unwrap();
        channel.send(&AlertMessage::test("shop")).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["source"], "breakwatch");
        assert!(body["timestamp"].is_string());
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let config = AlertChannelConfig::new(ChannelType::Generic, json!({ "url": server.uri() }));
        let channel = GenericChannel::from_config(&config, &ctx()).unwrap();
        let err = channel.send(&AlertMessage::test("shop")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transient(_)));
    }
}
