//! In-memory conversation store, useful for tests and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tierbot_core::conversation::ConversationId;
use tierbot_core::error::StoreError;
use tierbot_core::store::{ConversationStore, StoredConversation};
use tokio::sync::RwLock;

pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<ConversationId, StoredConversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn clear(&self) {
        self.conversations.write().await.clear();
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<StoredConversation>, StoreError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: StoredConversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.conversations.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierbot_core::conversation::{ConversationContext, Turn};

    #[tokio::test]
    async fn save_and_load() {
        let store = InMemoryConversationStore::new();
        let mut ctx = ConversationContext::new(ConversationId::from("c1"), "alice");
        ctx.append(Turn::user("hello")).unwrap();
        ctx.append(Turn::assistant("hi")).unwrap();

        store.save(StoredConversation::from(&ctx)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let loaded = store.load(&ConversationId::from("c1")).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "alice");
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[1].content, "hi");
    }

    #[tokio::test]
    async fn save_replaces_previous_state() {
        let store = InMemoryConversationStore::new();
        let mut ctx = ConversationContext::new(ConversationId::from("c1"), "alice");
        ctx.append(Turn::user("one")).unwrap();
        store.save(StoredConversation::from(&ctx)).await.unwrap();
        ctx.append(Turn::assistant("two")).unwrap();
        store.save(StoredConversation::from(&ctx)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let loaded = store.load(&ConversationId::from("c1")).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
    }

    #[tokio::test]
    async fn load_unknown_is_none() {
        let store = InMemoryConversationStore::new();
        assert!(store.load(&ConversationId::from("nope")).await.unwrap().is_none());
        store.clear().await;
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
