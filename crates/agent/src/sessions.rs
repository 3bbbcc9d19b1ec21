//! Per-conversation session table.
//!
//! Each conversation lives behind its own async mutex. Holding the owned
//! guard is what serializes dispatch cycles for that conversation; other
//! conversations are untouched.

use std::collections::HashMap;
use std::sync::Arc;
use tierbot_core::conversation::{ConversationContext, ConversationId};
use tierbot_core::store::{ConversationStore, StoredConversation};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Exclusive access to one conversation. Dropping it releases the lock.
pub type SessionGuard = OwnedMutexGuard<ConversationContext>;

#[derive(Default)]
pub struct ConversationSessions {
    table: Mutex<HashMap<ConversationId, Arc<Mutex<ConversationContext>>>>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl ConversationSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back sessions with a persistent store.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Lock a conversation, creating it (or loading it from the store) on
    /// first use. Waits while another cycle holds the same conversation.
    pub async fn acquire(&self, id: &ConversationId, user_id: &str) -> SessionGuard {
        let (slot, fresh_guard) = {
            let mut table = self.table.lock().await;
            match table.get(id) {
                Some(slot) => (slot.clone(), None),
                None => {
                    let slot = Arc::new(Mutex::new(ConversationContext::new(
                        id.clone(),
                        user_id,
                    )));
                    table.insert(id.clone(), slot.clone());
                    // Nobody else can have seen this slot yet.
                    let guard = slot.clone().try_lock_owned().ok();
                    (slot, guard)
                }
            }
        };

        match fresh_guard {
            Some(mut guard) => {
                self.hydrate(&mut guard).await;
                guard
            }
            None => slot.lock_owned().await,
        }
    }

    async fn hydrate(&self, ctx: &mut ConversationContext) {
        let Some(store) = &self.store else {
            return;
        };

        match store.load(&ctx.id).await {
            Ok(Some(stored)) if stored.id != ctx.id => warn!(
                conversation_id = %ctx.id,
                stored_id = %stored.id,
                store = store.name(),
                "Store returned another conversation, starting fresh"
            ),
            Ok(Some(stored)) => {
                match ConversationContext::restore(ctx.id.clone(), stored.user_id, stored.turns) {
                    Ok(restored) => {
                        debug!(
                            conversation_id = %restored.id,
                            turns = restored.len(),
                            "Conversation restored"
                        );
                        *ctx = restored;
                    }
                    Err(e) => warn!(
                        conversation_id = %ctx.id,
                        error = %e,
                        "Stored conversation violates history rules, starting fresh"
                    ),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(
                conversation_id = %ctx.id,
                store = store.name(),
                error = %e,
                "Failed to load conversation, starting fresh"
            ),
        }
    }

    /// Persist the conversation. Failures are logged, never returned.
    pub async fn save(&self, ctx: &ConversationContext) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(StoredConversation::from(ctx)).await {
            warn!(
                conversation_id = %ctx.id,
                store = store.name(),
                error = %e,
                "Failed to persist conversation"
            );
        }
    }

    /// Clear a conversation's history under its lock.
    pub async fn reset(&self, id: &ConversationId, user_id: &str) {
        let mut guard = self.acquire(id, user_id).await;
        guard.reset();
        self.save(&guard).await;
        debug!(conversation_id = %id, "Conversation reset");
    }

    /// Number of conversations seen by this process.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }
}
