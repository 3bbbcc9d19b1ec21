//! Conversation persistence trait.
//!
//! Persistence is optional: the core only needs in-process ordering, so a
//! store that fails is logged and bypassed rather than failing a cycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationContext, ConversationId, Turn};
use crate::error::StoreError;

/// The persisted form of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConversation {
    pub id: ConversationId,
    pub user_id: String,
    pub turns: Vec<Turn>,
}

impl From<&ConversationContext> for StoredConversation {
    fn from(ctx: &ConversationContext) -> Self {
        Self {
            id: ctx.id.clone(),
            user_id: ctx.user_id.clone(),
            turns: ctx.turns().to_vec(),
        }
    }
}

/// Durable backing for conversation contexts.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A human-readable name for this backend (e.g. "in_memory").
    fn name(&self) -> &str;

    /// Load a conversation, or `None` if it was never saved.
    async fn load(&self, id: &ConversationId) -> Result<Option<StoredConversation>, StoreError>;

    /// Persist the full current state of a conversation.
    async fn save(&self, conversation: StoredConversation) -> Result<(), StoreError>;

    /// Number of stored conversations.
    async fn count(&self) -> Result<usize, StoreError>;
}
