//! Wiring: build a ready dispatch engine from configuration.

use std::sync::Arc;
use std::time::Duration;
use tierbot_config::{AppConfig, ConversationBackend};
use tierbot_core::decision::DecisionStep;
use tierbot_core::error::RegistrationError;
use tierbot_core::event::EventBus;
use tierbot_core::store::ConversationStore;
use tierbot_memory::{FileConversationStore, InMemoryConversationStore, InMemorySubscriptionStore};
use tracing::info;

use crate::engine::{DispatchEngine, DispatchLimits};
use crate::formatter::ResponseFormatter;
use crate::sessions::ConversationSessions;
use crate::subscription::SubscriptionResolver;

/// A dispatch engine plus the collaborators callers may want to reach.
pub struct Runtime {
    pub engine: Arc<DispatchEngine>,
    /// The seeded subscription store (tier changes apply immediately)
    pub subscriptions: Arc<InMemorySubscriptionStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub event_bus: Arc<EventBus>,
}

impl Runtime {
    /// Build the tool catalog, stores and engine described by `config`.
    ///
    /// Fails only if the tool catalog cannot be built.
    pub fn from_config(
        config: &AppConfig,
        decision: Arc<dyn DecisionStep>,
    ) -> Result<Self, RegistrationError> {
        let registry = Arc::new(tierbot_tools::default_registry(&config.tools)?);

        let subscriptions = Arc::new(InMemorySubscriptionStore::seeded(
            config.subscription.users.iter().cloned(),
        ));
        let resolver = Arc::new(
            SubscriptionResolver::new(subscriptions.clone())
                .with_timeout(Duration::from_millis(config.subscription.lookup_timeout_ms)),
        );

        let conversations: Arc<dyn ConversationStore> = match config.conversations.backend {
            ConversationBackend::Memory => Arc::new(InMemoryConversationStore::new()),
            ConversationBackend::File => Arc::new(FileConversationStore::new(
                config
                    .conversations
                    .dir
                    .clone()
                    .unwrap_or_else(FileConversationStore::default_dir),
            )),
        };
        let sessions =
            Arc::new(ConversationSessions::new().with_store(conversations.clone()));

        let event_bus = Arc::new(EventBus::default());

        let mut engine = DispatchEngine::new(decision, registry, resolver)
            .with_sessions(sessions)
            .with_limits(DispatchLimits::from(&config.dispatch))
            .with_formatter(ResponseFormatter::from(&config.outbound))
            .with_event_bus(event_bus.clone());
        if let Some(base) = &config.dispatch.system_prompt_override {
            engine = engine.with_system_prompt(base.clone());
        }

        info!(
            decision_step = engine.decision_step_name(),
            tools = engine.registry().len(),
            seeded_users = config.subscription.users.len(),
            conversations = conversations.name(),
            "Dispatch runtime ready"
        );

        Ok(Self {
            engine: Arc::new(engine),
            subscriptions,
            conversations,
            event_bus,
        })
    }
}
