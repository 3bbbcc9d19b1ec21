//! In-memory subscription store, seeded from configuration.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tierbot_core::error::SubscriptionError;
use tierbot_core::tier::{SubscriptionStore, Tier, User};
use tokio::sync::RwLock;

/// A subscription store holding user records in a map.
///
/// Records can be changed at runtime (`set_tier`, `upsert`), so a tier
/// downgrade is visible to the very next lookup.
pub struct InMemorySubscriptionStore {
    users: Arc<RwLock<HashMap<String, User>>>,
    available: AtomicBool,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Create a store pre-populated with the given records.
    pub fn seeded(users: impl IntoIterator<Item = User>) -> Self {
        let map = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: Arc::new(RwLock::new(map)),
            available: AtomicBool::new(true),
        }
    }

    /// Insert or replace a user record.
    pub async fn upsert(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Change the tier of an existing user. Returns false if unknown.
    pub async fn set_tier(&self, user_id: &str, tier: Tier) -> bool {
        match self.users.write().await.get_mut(user_id) {
            Some(user) => {
                user.tier = tier;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        self.users.write().await.remove(user_id).is_some()
    }

    /// Simulate a backend outage: lookups fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<User>, SubscriptionError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Unavailable(
                "in-memory store marked unavailable".into(),
            ));
        }
        Ok(self.users.read().await.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_seeded_user() {
        let store = InMemorySubscriptionStore::seeded([User::new("alice", Tier::Pro)]);
        let user = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Pro);
        assert!(store.lookup("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tier_change_visible_to_next_lookup() {
        let store = InMemorySubscriptionStore::seeded([User::new("alice", Tier::Pro)]);
        assert!(store.set_tier("alice", Tier::Free).await);
        assert!(!store.set_tier("bob", Tier::Free).await);
        let user = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Free);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemorySubscriptionStore::seeded([User::new("alice", Tier::Pro)]);
        store.set_available(false);
        assert!(matches!(
            store.lookup("alice").await,
            Err(SubscriptionError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.lookup("alice").await.is_ok());
    }

    #[tokio::test]
    async fn upsert_and_remove() {
        let store = InMemorySubscriptionStore::new();
        assert!(store.is_empty().await);
        store.upsert(User::new("carol", Tier::Plus)).await;
        assert_eq!(store.len().await, 1);
        assert!(store.remove("carol").await);
        assert!(!store.remove("carol").await);
    }
}
