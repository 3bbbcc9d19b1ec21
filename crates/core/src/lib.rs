//! # tierbot core
//!
//! Domain types, traits, and error definitions for the tierbot dispatch
//! runtime. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here (decision step,
//! subscription store, conversation store, channel). Implementations live in
//! their respective crates, so tests can swap in scripted stubs.

pub mod channel;
pub mod conversation;
pub mod decision;
pub mod error;
pub mod event;
pub mod store;
pub mod tier;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, InboundMessage, OutboundMessage, OutboundSender, PayloadKind};
pub use conversation::{ConversationContext, ConversationId, Turn, TurnRole};
pub use decision::{Decision, DecisionRequest, DecisionStep};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use store::{ConversationStore, StoredConversation};
pub use tier::{SubscriptionStore, Tier, User};
pub use tool::{
    Tool, ToolCall, ToolDescriptor, ToolOutput, ToolOverride, ToolRegistry, ToolRegistryBuilder,
};
