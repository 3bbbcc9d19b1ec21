//! Error types for the tierbot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; only registration errors
//! are fatal; everything raised inside a dispatch cycle is absorbed there.

use crate::tier::Tier;
use thiserror::Error;

/// The top-level error type for all tierbot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Decision step errors ---
    #[error("Decision step error: {0}")]
    Decision(#[from] DecisionError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Subscription errors ---
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Startup registration errors ---
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    // --- Conversation errors ---
    #[error("Conversation error: {0}")]
    Context(#[from] ContextError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the external decision step (the model call).
#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed decision: {0}")]
    Malformed(String),

    #[error("Decision step not configured: {0}")]
    NotConfigured(String),
}

impl DecisionError {
    /// Whether a second attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {recipient}: {reason}")]
    DeliveryFailed { recipient: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error("Subscription backend unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stored conversation is corrupt: {0}")]
    Corrupt(String),
}

/// Raised while building the tool catalog. A process must not start with a
/// broken catalog, so these escape to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Override configured for unknown tool: {0}")]
    UnknownOverride(String),
}

/// Recoverable tool failures. The dispatch engine records these as
/// tool_result error turns instead of propagating them.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool is disabled: {0}")]
    Disabled(String),

    #[error("Access denied: {tool_name} requires the {required} tier (caller is {actual})")]
    AccessDenied {
        tool_name: String,
        required: Tier,
        actual: Tier,
    },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Violations of the conversation history invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Tool result {0} has no matching pending tool call")]
    UnmatchedToolResult(String),

    #[error("Tool call id {0} is already in use")]
    DuplicateCallId(String),

    #[error("Turn of role {0} is missing its correlation id")]
    MissingCallId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_error_displays_correctly() {
        let err = Error::Decision(DecisionError::ApiError {
            status_code: 502,
            message: "Bad gateway".into(),
        });
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("Bad gateway"));
    }

    #[test]
    fn access_denied_names_both_tiers() {
        let err = ToolError::AccessDenied {
            tool_name: "calculator".into(),
            required: Tier::Pro,
            actual: Tier::Free,
        };
        let text = err.to_string();
        assert!(text.contains("calculator"));
        assert!(text.contains("pro"));
        assert!(text.contains("free"));
    }

    #[test]
    fn auth_failures_are_not_retried() {
        assert!(!DecisionError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(DecisionError::Network("reset".into()).is_retryable());
        assert!(DecisionError::RateLimited { retry_after_secs: 1 }.is_retryable());
    }
}
