//! Conversation turns and the append-only conversation context.
//!
//! User sends a message → the dispatch engine appends turns while it decides
//! and calls tools → the final assistant turn goes back to the channel.
//!
//! Turns are never edited once appended. Corrections are new turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::ContextError;
use crate::tool::ToolCall;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The end user
    User,
    /// The assistant's natural-language reply
    Assistant,
    /// A tool invocation requested by the decision step
    ToolCall,
    /// The outcome of a tool invocation
    ToolResult,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::ToolCall => "tool_call",
            TurnRole::ToolResult => "tool_result",
        }
    }
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    pub role: TurnRole,

    /// Text content (tool output or error summary for tool results)
    pub content: String,

    /// Correlation id shared by a tool_call and its tool_result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Arguments of a tool_call turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,

    /// Set on tool_result turns that carry a failure
    #[serde(default)]
    pub is_error: bool,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn base(role: TurnRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            call_id: None,
            tool_name: None,
            arguments: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(TurnRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(TurnRole::Assistant, content.into())
    }

    /// A tool invocation request.
    pub fn tool_call(call: &ToolCall) -> Self {
        Self {
            call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            arguments: Some(call.arguments.clone()),
            ..Self::base(TurnRole::ToolCall, String::new())
        }
    }

    /// A successful tool result.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::base(TurnRole::ToolResult, content.into())
        }
    }

    /// A failed tool result carrying an error description.
    pub fn tool_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(call_id, tool_name, error)
        }
    }

    /// Rebuild the call this turn requested, if it is a tool_call turn.
    pub fn as_tool_call(&self) -> Option<ToolCall> {
        if self.role != TurnRole::ToolCall {
            return None;
        }
        Some(ToolCall {
            id: self.call_id.clone()?,
            name: self.tool_name.clone().unwrap_or_default(),
            arguments: self.arguments.clone().unwrap_or(serde_json::Value::Null),
        })
    }
}

/// The ordered, append-only turn history of one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub id: ConversationId,

    /// The user this conversation belongs to
    pub user_id: String,

    turns: Vec<Turn>,

    /// Tool calls still waiting for their result
    #[serde(skip)]
    pending: HashSet<String>,

    /// Every correlation id ever used in this history
    #[serde(skip)]
    seen_call_ids: HashSet<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(id: ConversationId, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            turns: Vec::new(),
            pending: HashSet::new(),
            seen_call_ids: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a context from persisted turns, re-checking every invariant.
    pub fn restore(
        id: ConversationId,
        user_id: impl Into<String>,
        turns: Vec<Turn>,
    ) -> Result<Self, ContextError> {
        let mut ctx = Self::new(id, user_id);
        if let Some(first) = turns.first() {
            ctx.created_at = first.timestamp;
        }
        for turn in turns {
            ctx.append(turn)?;
        }
        Ok(ctx)
    }

    /// Append a turn, preserving order.
    ///
    /// A tool_result must answer a tool_call that is still pending; a
    /// tool_call must use a correlation id never seen before.
    pub fn append(&mut self, turn: Turn) -> Result<(), ContextError> {
        match turn.role {
            TurnRole::ToolCall => {
                let call_id = turn
                    .call_id
                    .clone()
                    .ok_or_else(|| ContextError::MissingCallId(turn.role.as_str().into()))?;
                if !self.seen_call_ids.insert(call_id.clone()) {
                    return Err(ContextError::DuplicateCallId(call_id));
                }
                self.pending.insert(call_id);
            }
            TurnRole::ToolResult => {
                let call_id = turn
                    .call_id
                    .as_deref()
                    .ok_or_else(|| ContextError::MissingCallId(turn.role.as_str().into()))?;
                if !self.pending.remove(call_id) {
                    return Err(ContextError::UnmatchedToolResult(call_id.to_string()));
                }
            }
            TurnRole::User | TurnRole::Assistant => {}
        }
        self.updated_at = Utc::now();
        self.turns.push(turn);
        Ok(())
    }

    /// Whether a correlation id has already been used in this history.
    pub fn has_call_id(&self, call_id: &str) -> bool {
        self.seen_call_ids.contains(call_id)
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// At most the `max_turns` most recent turns, for prompt construction.
    ///
    /// Never contains a tool_result whose tool_call fell outside it: a cut
    /// inside a call/result batch moves forward past the orphaned results.
    pub fn window(&self, max_turns: usize) -> &[Turn] {
        let mut start = self.turns.len().saturating_sub(max_turns);
        while let Some(orphan) = self.first_orphan_result(start) {
            start = orphan + 1;
        }
        &self.turns[start..]
    }

    /// Index of the first tool_result at or after `start` whose call is not
    /// also at or after `start`.
    fn first_orphan_result(&self, start: usize) -> Option<usize> {
        let mut calls = HashSet::new();
        for (i, turn) in self.turns.iter().enumerate().skip(start) {
            match turn.role {
                TurnRole::ToolCall => {
                    if let Some(id) = turn.call_id.as_deref() {
                        calls.insert(id);
                    }
                }
                TurnRole::ToolResult
                    if !turn.call_id.as_deref().is_some_and(|id| calls.contains(id)) =>
                {
                    return Some(i);
                }
                _ => {}
            }
        }
        None
    }

    /// Tool calls that have no result yet, in call order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.turns
            .iter()
            .filter_map(Turn::as_tool_call)
            .filter(|call| self.pending.contains(&call.id))
            .collect()
    }

    /// Clear the history ("new conversation").
    pub fn reset(&mut self) {
        self.turns.clear();
        self.pending.clear();
        self.seen_call_ids.clear();
        self.updated_at = Utc::now();
    }

    /// The last assistant reply, if any.
    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
