pub mod channels;
pub mod dispatcher;
pub mod message;
pub mod retry;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::document::canonical::canonical_json;
use crate::error::ChannelError;

pub use channels::{AlertChannel, Channel, ChannelContext};
pub use dispatcher::AlertDispatcher;
pub use message::AlertMessage;
pub use retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Bot,
    Webhook,
    Hybrid,
    Email,
    Generic,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Webhook => "webhook",
            Self::Hybrid => "hybrid",
            Self::Email => "email",
            Self::Generic => "generic",
        }
    }
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl AlertChannelConfig {
    pub fn new(channel_type: ChannelType, parameters: Value) -> Self {
        Self {
            channel_type,
            parameters,
            is_active: true,
        }
    }

    pub fn param(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.parameters.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn require(&self, keys: &[&str]) -> Result<&str, ChannelError> {
        self.param(keys).ok_or_else(|| {
            ChannelError::Config(format!(
                "{} channel requires parameter '{}'",
                self.channel_type,
                keys.first().copied().unwrap_or("?")
            ))
        })
    }

    pub fn key(&self) -> String {
        canonical_json(&json!({
            "type": self.channel_type,
            "parameters": self.parameters,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDispatchOutcome {
    pub channel_type: ChannelType,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriable: Option<bool>,
}

impl AlertDispatchOutcome {
    pub fn delivered(channel_type: ChannelType, message: impl Into<String>) -> Self {
        Self {
            channel_type,
            success: true,
            message: message.into(),
            retriable: None,
        }
    }

    pub fn failed(channel_type: ChannelType, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            channel_type,
            success: false,
            message: message.into(),
            retriable: Some(retriable),
        }
    }

    pub fn from_result(channel_type: ChannelType, result: Result<String, ChannelError>) -> Self {
        match result {
            Ok(message) => Self::delivered(channel_type, message),
            Err(err) => Self::failed(channel_type, err.to_string(), err.is_retriable()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSendResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
