//! The tier-aware dispatch engine.
//!
//! One inbound message runs one **dispatch cycle**:
//!
//! 1. **Lock** the conversation (one cycle per conversation at a time)
//! 2. **Resolve** the sender's subscription tier (fails closed to free)
//! 3. **Decide**: the decision step sees the history and the tools visible
//!    at that tier
//! 4. **If tool calls**: re-check the tier, run them, record every result,
//!    go back to step 3
//! 5. **If text**: record the reply, format it and hand it to the channel
//!
//! The round-trip budget, the per-tool and per-cycle timers and a single
//! decision retry keep every cycle bounded.

pub mod engine;
pub mod formatter;
pub mod prompt;
pub mod runtime;
pub mod sessions;
pub mod subscription;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{
    BUDGET_EXHAUSTED_REPLY, CycleOutcome, DispatchEngine, DispatchLimits, DispatchResult,
    FALLBACK_REPLY, InvocationRecord,
};
pub use formatter::{EMPTY_REPLY_FALLBACK, ResponseFormatter};
pub use prompt::build_system_prompt;
pub use runtime::Runtime;
pub use sessions::{ConversationSessions, SessionGuard};
pub use subscription::SubscriptionResolver;
