//! Decision step trait: the abstraction over the model call.
//!
//! Given the windowed conversation and the tools visible to the caller, a
//! decision step either replies in plain text or asks for one or more tool
//! invocations. Model choice and prompt format belong to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationId, Turn};
use crate::error::DecisionError;
use crate::tool::{ToolCall, ToolDescriptor};

/// Everything the decision step sees for one round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub conversation_id: ConversationId,

    /// Instructions for the model, including the visible tool list
    pub system_prompt: String,

    /// The windowed conversation, oldest first
    pub turns: Vec<Turn>,

    /// Tools the caller may use, ordered by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

/// What the decision step wants to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Decision {
    /// A terminal plain-text reply
    Reply(String),
    /// Run these tools, in this order, then ask again
    Invoke(Vec<ToolCall>),
}

/// The core decision step trait.
///
/// The dispatch engine calls `decide()` without knowing which model backs it.
#[async_trait]
pub trait DecisionStep: Send + Sync {
    /// A human-readable name (e.g. "openai", "scripted").
    fn name(&self) -> &str;

    /// Produce the next decision for the given request.
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError>;

    /// Health check: can we reach the backing model?
    async fn health_check(&self) -> Result<bool, DecisionError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serialization_is_tagged() {
        let reply = serde_json::to_value(Decision::Reply("hi".into())).unwrap();
        assert_eq!(reply["type"], "reply");
        assert_eq!(reply["value"], "hi");

        let invoke = Decision::Invoke(vec![ToolCall::new(
            "call_1",
            "calculator",
            serde_json::json!({"expression": "2+2"}),
        )]);
        let json = serde_json::to_string(&invoke).unwrap();
        assert!(json.contains("invoke"));
        assert!(json.contains("calculator"));
    }
}
