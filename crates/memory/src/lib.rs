//! Subscription and conversation store implementations for tierbot.

pub mod file_store;
pub mod in_memory;
pub mod subscription;

pub use file_store::FileConversationStore;
pub use in_memory::InMemoryConversationStore;
pub use subscription::InMemorySubscriptionStore;
