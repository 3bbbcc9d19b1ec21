//! Subscription resolver: maps a user id to the tier they may exercise.
//!
//! Fails closed. Any doubt about the user's subscription resolves to
//! [`Tier::Free`], never to a paid tier.

use std::sync::Arc;
use std::time::Duration;
use tierbot_core::tier::{SubscriptionStore, Tier};
use tracing::{debug, warn};

pub struct SubscriptionResolver {
    store: Arc<dyn SubscriptionStore>,
    timeout: Duration,
}

impl SubscriptionResolver {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(2),
        }
    }

    /// Lookups slower than `timeout` resolve to the free tier.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the tier for `user_id`.
    ///
    /// Unknown users, inactive users, backend errors and slow lookups all
    /// yield `Tier::Free`.
    pub async fn resolve_tier(&self, user_id: &str) -> Tier {
        match tokio::time::timeout(self.timeout, self.store.lookup(user_id)).await {
            Ok(Ok(Some(user))) => {
                if !user.active {
                    debug!(user_id, tier = %user.tier, "Inactive subscription, using free tier");
                }
                user.effective_tier()
            }
            Ok(Ok(None)) => {
                debug!(user_id, "Unknown user, using free tier");
                Tier::Free
            }
            Ok(Err(e)) => {
                warn!(
                    user_id,
                    store = self.store.name(),
                    error = %e,
                    "Subscription lookup failed, using free tier"
                );
                Tier::Free
            }
            Err(_) => {
                warn!(
                    user_id,
                    store = self.store.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Subscription lookup timed out, using free tier"
                );
                Tier::Free
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tierbot_core::error::SubscriptionError;
    use tierbot_core::tier::User;
    use tierbot_memory::InMemorySubscriptionStore;

    struct SlowStore;

    #[async_trait]
    impl SubscriptionStore for SlowStore {
        fn name(&self) -> &str {
            "slow"
        }

        async fn lookup(&self, user_id: &str) -> Result<Option<User>, SubscriptionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(User::new(user_id, Tier::Pro)))
        }
    }

    fn store() -> Arc<InMemorySubscriptionStore> {
        let mut lapsed = User::new("lapsed", Tier::Pro);
        lapsed.active = false;
        Arc::new(InMemorySubscriptionStore::seeded([
            User::new("pro-user", Tier::Pro),
            User::new("plus-user", Tier::Plus),
            lapsed,
        ]))
    }

    #[tokio::test]
    async fn known_active_users_get_their_tier() {
        let resolver = SubscriptionResolver::new(store());
        assert_eq!(resolver.resolve_tier("pro-user").await, Tier::Pro);
        assert_eq!(resolver.resolve_tier("plus-user").await, Tier::Plus);
    }

    #[tokio::test]
    async fn unknown_and_inactive_users_are_free() {
        let resolver = SubscriptionResolver::new(store());
        assert_eq!(resolver.resolve_tier("stranger").await, Tier::Free);
        assert_eq!(resolver.resolve_tier("lapsed").await, Tier::Free);
    }

    #[tokio::test]
    async fn backend_error_fails_closed() {
        let store = store();
        store.set_available(false);
        let resolver = SubscriptionResolver::new(store);
        assert_eq!(resolver.resolve_tier("pro-user").await, Tier::Free);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_fails_closed() {
        let resolver =
            SubscriptionResolver::new(Arc::new(SlowStore)).with_timeout(Duration::from_millis(100));
        assert_eq!(resolver.resolve_tier("anyone").await, Tier::Free);
    }
}
