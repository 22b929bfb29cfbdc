//! SMS channel — forwards replies to an HTTP webhook.
//!
//! The webhook receives `POST {"user_id": ..., "message": ...}` as JSON and
//! must answer 2xx. Anything else is a failed delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::channels::OutboundChannel;
use crate::config::SmsConfig;
use crate::error::DeliveryError;

const CHANNEL_NAME: &str = "sms";

/// Longest response body kept in a rejection error.
const MAX_BODY_IN_ERROR: usize = 200;

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    user_id: &'a str,
    message: &'a str,
}

/// SMS webhook channel.
pub struct SmsWebhook {
    outbound_url: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SmsWebhook {
    /// Build the channel. A missing URL is reported on each delivery, not here.
    pub fn new(config: &SmsConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DeliveryError::Transport {
                channel: CHANNEL_NAME.into(),
                reason: format!("client build: {e}"),
            })?;
        if config.outbound_url.is_none() {
            warn!("SMS_OUTBOUND_URL is not set; replies will be marked failed");
        }
        Ok(Self {
            outbound_url: config.outbound_url.clone(),
            timeout: config.timeout,
            client,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Transport {
                channel: CHANNEL_NAME.into(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl OutboundChannel for SmsWebhook {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn deliver(&self, user_id: &str, text: &str) -> Result<(), DeliveryError> {
        let url = self
            .outbound_url
            .as_deref()
            .ok_or(DeliveryError::NotConfigured("SMS_OUTBOUND_URL"))?;

        let resp = self
            .client
            .post(url)
            .json(&SmsPayload {
                user_id,
                message: text,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
            return Err(DeliveryError::Rejected {
                channel: CHANNEL_NAME.into(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(user_id, status = status.as_u16(), "SMS webhook accepted reply");
        Ok(())
    }
}
