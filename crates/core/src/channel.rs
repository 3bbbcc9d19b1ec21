//! Channel contract: normalized inbound messages and outbound payloads.
//!
//! A Channel connects tierbot to a messaging platform. Transport details
//! (webhooks, signatures, HTTP) stay behind this trait; the core only sees
//! normalized [`InboundMessage`]s and emits [`OutboundMessage`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;
use crate::error::ChannelError;

/// A normalized inbound text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Sender identity (platform user id, e.g. a phone number)
    pub user_id: String,

    /// The conversation this message belongs to
    pub conversation_id: ConversationId,

    pub text: String,

    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: ConversationId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Payload kinds the formatter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
}

/// One outbound message in the channel's payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: ConversationId,

    /// Recipient identity on the channel
    pub to: String,

    #[serde(rename = "type")]
    pub kind: PayloadKind,

    pub text: String,

    /// Position of this part when a reply was split (1-based)
    pub part: usize,

    /// Number of parts the reply was split into
    pub total_parts: usize,
}

/// Delivers outbound messages. Retries and backoff are the sender's concern.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;
}

/// A bidirectional channel: produces inbound messages and delivers replies.
#[async_trait]
pub trait Channel: OutboundSender {
    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError>;

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_creation() {
        let msg = InboundMessage::new("+15550001", ConversationId::from("c1"), "calculate 2+2");
        assert_eq!(msg.user_id, "+15550001");
        assert_eq!(msg.conversation_id.0, "c1");
        assert_eq!(msg.text, "calculate 2+2");
    }

    #[test]
    fn outbound_payload_uses_channel_field_names() {
        let msg = OutboundMessage {
            conversation_id: ConversationId::from("c1"),
            to: "+15550001".into(),
            kind: PayloadKind::Text,
            text: "4".into(),
            part: 1,
            total_parts: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["to"], "+15550001");
    }
}
