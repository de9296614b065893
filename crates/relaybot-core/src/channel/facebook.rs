use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::MessengerConfig;
use crate::error::ChannelError;
use crate::types::{InboundEvent, OutboundMessage};
use crate::util::http;

use super::Notifier;

// ====== Facebook Messenger Webhook Types ======

/// Facebook webhook event envelope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookWebhookEvent {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "skip_malformed")]
    pub entry: Vec<FacebookEntry>,
}

/// A single entry in the webhook event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default, deserialize_with = "skip_malformed")]
    pub messaging: Vec<FacebookMessaging>,
}

/// A messaging event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookMessaging {
    #[serde(default)]
    pub sender: Option<FacebookUser>,
    #[serde(default)]
    pub recipient: Option<FacebookUser>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<FacebookMessage>,
}

/// Facebook user reference.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookUser {
    #[serde(default)]
    pub id: Option<String>,
}

/// Facebook message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub quick_reply: Option<FacebookQuickReply>,
}

/// Payload of a tapped quick reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FacebookQuickReply {
    #[serde(default)]
    pub payload: Option<String>,
}

/// Deserialize a list element by element, dropping elements that do not fit
/// the target type instead of rejecting the whole envelope.
fn skip_malformed<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("Skipping malformed webhook item: {}", e);
                None
            }
        })
        .collect())
}

impl FacebookMessaging {
    /// Convert into a dispatchable event.
    ///
    /// Returns `None` without a sender id, without a message object, or
    /// without message text. A quick-reply payload wins over the echoed text.
    pub fn to_inbound(&self) -> Option<InboundEvent> {
        let user_id = self.sender.as_ref()?.id.as_deref()?;
        if user_id.is_empty() {
            return None;
        }
        let message = self.message.as_ref()?;
        let text = message.text.as_ref()?;

        match message.quick_reply.as_ref().and_then(|qr| qr.payload.as_ref()) {
            Some(payload) => Some(InboundEvent::quick_reply(user_id, payload.clone())),
            None => Some(InboundEvent::text(user_id, text.clone())),
        }
    }
}

impl FacebookWebhookEvent {
    /// Flatten `entry[].messaging[]` into inbound events, skipping unusable ones.
    pub fn inbound_events(&self) -> Vec<InboundEvent> {
        self.entry
            .iter()
            .flat_map(|entry| entry.messaging.iter())
            .filter_map(FacebookMessaging::to_inbound)
            .collect()
    }
}

// ====== Channel Implementation ======

pub struct FacebookChannel {
    client: reqwest::Client,
    page_access_token: String,
    graph_api_base: String,
    timeout: Duration,
}

impl FacebookChannel {
    pub fn new(page_access_token: String, graph_api_base: String, timeout: Duration) -> Self {
        Self {
            client: http::client().clone(),
            page_access_token,
            graph_api_base: graph_api_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &MessengerConfig) -> Self {
        Self::new(
            config.page_access_token.clone(),
            config.graph_api_base.clone(),
            Duration::from_secs(config.send_timeout_secs),
        )
    }

    /// Parse a Facebook webhook event from JSON body.
    pub fn parse_webhook_event(body: &str) -> Result<FacebookWebhookEvent, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Build the Send API request body.
    pub fn send_payload(msg: &OutboundMessage) -> serde_json::Value {
        let mut message = json!({ "text": msg.text });
        if !msg.quick_replies.is_empty() {
            message["quick_replies"] = json!(msg.quick_replies);
        }
        json!({
            "messaging_type": "RESPONSE",
            "recipient": { "id": msg.recipient_id },
            "message": message,
        })
    }
}

#[async_trait]
impl Notifier for FacebookChannel {
    fn name(&self) -> &str {
        "facebook"
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let url = format!("{}/me/messages", self.graph_api_base);

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", self.page_access_token.as_str())])
            .timeout(self.timeout)
            .json(&Self::send_payload(msg))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Send(format!(
                "Facebook Send API returned {}: {}",
                status, body
            )));
        }

        debug!("Sent message to {}", msg.recipient_id);
        Ok(())
    }
}
