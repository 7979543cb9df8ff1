use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::alert::channels::{AlertChannel, Channel, ChannelContext};
use crate::alert::message::AlertMessage;
use crate::alert::retry::RetryPolicy;
use crate::alert::{AlertChannelConfig, AlertDispatchOutcome, TestSendResult};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    ctx: ChannelContext,
}

impl AlertDispatcher {
    pub fn new(ctx: ChannelContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ChannelContext {
        &self.ctx
    }

    // One outcome per active channel, in configuration order. A failing channel
    // never short-circuits the others.
    pub async fn dispatch(
        &self,
        message: &AlertMessage,
        channels: &[AlertChannelConfig],
    ) -> Vec<AlertDispatchOutcome> {
        let attempts = channels
            .iter()
            .filter(|config| config.is_active)
            .map(|config| self.deliver(config, message));
        join_all(attempts).await
    }

    async fn deliver(
        &self,
        config: &AlertChannelConfig,
        message: &AlertMessage,
    ) -> AlertDispatchOutcome {
        let result = send_with(config, message, &self.ctx).await;
        match &result {
            Ok(sent) => info!(
                channel = %config.channel_type,
                project_id = %message.project_id,
                "{sent}"
            ),
            Err(err) => warn!(
                channel = %config.channel_type,
                project_id = %message.project_id,
                retriable = err.is_retriable(),
                error = %err,
                "alert delivery failed"
            ),
        }
        AlertDispatchOutcome::from_result(config.channel_type, result)
    }

    pub async fn test_send(&self, project_id: &str, config: &AlertChannelConfig) -> TestSendResult {
        let ctx = self.ctx.clone().with_retry(RetryPolicy::none());
        let message = AlertMessage::test(project_id);
        match send_with(config, &message, &ctx).await {
            Ok(sent) => TestSendResult {
                success: true,
                message: sent,
                details: None,
            },
            Err(err) => TestSendResult {
                success: false,
                message: err.to_string(),
                details: Some(json!({
                    "channelType": config.channel_type,
                    "errorKind": error_kind(&err),
                    "retriable": err.is_retriable(),
                })),
            },
        }
    }
}

async fn send_with(
    config: &AlertChannelConfig,
    message: &AlertMessage,
    ctx: &ChannelContext,
) -> Result<String, ChannelError> {
    let channel = Channel::from_config(config, ctx)?;
    channel.send(message).await
}

fn error_kind(err: &ChannelError) -> &'static str {
    match err {
        ChannelError::Config(_) => "config",
        ChannelError::Permission(_) => "permission",
        ChannelError::Transient(_) => "transient",
    }
}
