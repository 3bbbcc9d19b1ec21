//! The dispatch engine: one inbound message in, one reply out.
//!
//! Each cycle is an explicit state machine:
//!
//! ```text
//! AwaitingDecision ──Reply──────────────────────────▶ Terminal
//!        │  ▲
//!   Invoke  └──── results appended ────┐
//!        ▼                             │
//! ExecutingTools ──────────────────────┘
//! ```
//!
//! Tool failures become error results the decision step can see. A failed
//! decision step, an exhausted round-trip budget or an expired cycle timer
//! end the cycle with a fixed reply. The caller always gets something to
//! send back.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierbot_config::DispatchConfig;
use tierbot_core::channel::{InboundMessage, OutboundSender};
use tierbot_core::conversation::{ConversationContext, ConversationId, Turn};
use tierbot_core::decision::{Decision, DecisionRequest, DecisionStep};
use tierbot_core::error::{ChannelError, DecisionError, ToolError};
use tierbot_core::event::{DomainEvent, EventBus};
use tierbot_core::tier::Tier;
use tierbot_core::tool::{ToolCall, ToolDescriptor, ToolRegistry};
use tracing::{debug, error, info, warn};

use crate::formatter::ResponseFormatter;
use crate::prompt::build_system_prompt;
use crate::sessions::ConversationSessions;
use crate::subscription::SubscriptionResolver;

/// Sent when the decision step cannot produce an answer.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I encountered an error processing your message. Please try again.";

/// Sent when the cycle used up its tool round-trips.
pub const BUDGET_EXHAUSTED_REPLY: &str = "I wasn't able to finish that within the allowed \
number of steps. Could you try a simpler or more specific request?";

/// Content of the error result given to calls cut off by the cycle timer.
const CANCELLED_RESULT: &str = "cancelled: the request took too long and was stopped";

/// Numeric limits of a dispatch cycle.
#[derive(Debug, Clone)]
pub struct DispatchLimits {
    pub max_round_trips: u32,
    pub history_window: usize,
    pub cycle_timeout: Duration,
    pub tool_timeout: Duration,
    pub decision_retry_backoff: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchLimits {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_round_trips: config.max_round_trips.max(1),
            history_window: config.history_window.max(1),
            cycle_timeout: Duration::from_secs(config.cycle_timeout_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            decision_retry_backoff: Duration::from_millis(config.decision_retry_backoff_ms),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The decision step produced a reply
    Replied,
    /// The round-trip budget ran out
    BudgetExhausted,
    /// The decision step failed twice (or could not be retried)
    DecisionFailed,
    /// The cycle timer expired
    TimedOut,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Replied => "replied",
            CycleOutcome::BudgetExhausted => "budget_exhausted",
            CycleOutcome::DecisionFailed => "decision_failed",
            CycleOutcome::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation made during a cycle.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Tier the caller held at invocation time
    pub tier: Tier,
    /// Tool output on success
    pub output: Option<String>,
    pub error: Option<ToolError>,
    pub duration_ms: u64,
}

impl InvocationRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// The result of handling one inbound message.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub conversation_id: ConversationId,
    /// Who the reply goes to
    pub recipient: String,
    /// Tier resolved at the start of the cycle
    pub tier: Tier,
    pub reply: String,
    pub outcome: CycleOutcome,
    /// Tool-execution phases used
    pub round_trips: u32,
    pub invocations: Vec<InvocationRecord>,
}

enum CycleState {
    AwaitingDecision,
    ExecutingTools(Vec<ToolCall>),
    Terminal(CycleOutcome, String),
}

/// Mutable bookkeeping that must outlive a cancelled cycle future.
struct CycleTrace {
    tier: Tier,
    round_trips: u32,
    invocations: Vec<InvocationRecord>,
}

pub struct DispatchEngine {
    decision: Arc<dyn DecisionStep>,
    registry: Arc<ToolRegistry>,
    resolver: Arc<SubscriptionResolver>,
    sessions: Arc<ConversationSessions>,
    formatter: ResponseFormatter,
    limits: DispatchLimits,
    event_bus: Arc<EventBus>,
    base_prompt: Option<String>,
}

impl DispatchEngine {
    pub fn new(
        decision: Arc<dyn DecisionStep>,
        registry: Arc<ToolRegistry>,
        resolver: Arc<SubscriptionResolver>,
    ) -> Self {
        Self {
            decision,
            registry,
            resolver,
            sessions: Arc::new(ConversationSessions::new()),
            formatter: ResponseFormatter::default(),
            limits: DispatchLimits::default(),
            event_bus: Arc::new(EventBus::default()),
            base_prompt: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<ConversationSessions>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_limits(mut self, limits: DispatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_formatter(mut self, formatter: ResponseFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Replace the built-in base prompt. The tool section is still appended.
    pub fn with_system_prompt(mut self, base: impl Into<String>) -> Self {
        self.base_prompt = Some(base.into());
        self
    }

    pub fn decision_step_name(&self) -> &str {
        self.decision.name()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &DispatchLimits {
        &self.limits
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one dispatch cycle for an inbound message.
    ///
    /// Holds the conversation's lock for the whole cycle. Never fails.
    pub async fn handle(&self, inbound: InboundMessage) -> DispatchResult {
        let mut ctx = self
            .sessions
            .acquire(&inbound.conversation_id, &inbound.user_id)
            .await;

        let tier = self.resolver.resolve_tier(&inbound.user_id).await;

        info!(
            conversation_id = %inbound.conversation_id,
            user_id = %inbound.user_id,
            tier = %tier,
            turns = ctx.len(),
            "Dispatch cycle started"
        );

        self.event_bus.publish(DomainEvent::MessageReceived {
            conversation_id: inbound.conversation_id.to_string(),
            user_id: inbound.user_id.clone(),
            tier,
            content_preview: inbound.text.chars().take(50).collect(),
            timestamp: Utc::now(),
        });

        // A user turn is always accepted; this only fails on corrupt state.
        if let Err(e) = ctx.append(Turn::user(inbound.text.as_str())) {
            error!(conversation_id = %inbound.conversation_id, error = %e, "Could not record user turn");
        }

        let mut trace = CycleTrace {
            tier,
            round_trips: 0,
            invocations: Vec::new(),
        };

        let (outcome, reply) = match tokio::time::timeout(
            self.limits.cycle_timeout,
            self.run_cycle(&mut ctx, &inbound.user_id, &mut trace),
        )
        .await
        {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    conversation_id = %inbound.conversation_id,
                    timeout_secs = self.limits.cycle_timeout.as_secs(),
                    round_trips = trace.round_trips,
                    "Dispatch cycle timed out"
                );
                (CycleOutcome::TimedOut, FALLBACK_REPLY.to_string())
            }
        };

        close_pending(&mut ctx, CANCELLED_RESULT);
        if let Err(e) = ctx.append(Turn::assistant(reply.as_str())) {
            error!(conversation_id = %inbound.conversation_id, error = %e, "Could not record reply");
        }

        self.sessions.save(&ctx).await;
        drop(ctx);

        info!(
            conversation_id = %inbound.conversation_id,
            outcome = %outcome,
            round_trips = trace.round_trips,
            tools_called = trace.invocations.len(),
            "Dispatch cycle finished"
        );

        self.event_bus.publish(DomainEvent::CycleCompleted {
            conversation_id: inbound.conversation_id.to_string(),
            outcome: outcome.as_str().into(),
            round_trips: trace.round_trips,
            timestamp: Utc::now(),
        });

        DispatchResult {
            conversation_id: inbound.conversation_id,
            recipient: inbound.user_id,
            tier,
            reply,
            outcome,
            round_trips: trace.round_trips,
            invocations: trace.invocations,
        }
    }

    /// Handle a message, format the reply and deliver it.
    ///
    /// Delivery errors are returned; retrying them is the sender's job.
    pub async fn respond(
        &self,
        inbound: InboundMessage,
        sender: &dyn OutboundSender,
    ) -> Result<DispatchResult, ChannelError> {
        let result = self.handle(inbound).await;
        let messages =
            self.formatter
                .format(&result.conversation_id, &result.recipient, &result.reply);

        for message in &messages {
            if let Err(e) = sender.send(message).await {
                warn!(
                    conversation_id = %result.conversation_id,
                    channel = sender.name(),
                    part = message.part,
                    error = %e,
                    "Failed to deliver reply"
                );
                return Err(e);
            }
        }

        debug!(
            conversation_id = %result.conversation_id,
            parts = messages.len(),
            "Reply delivered"
        );
        Ok(result)
    }

    /// Start a conversation over. Waits for any running cycle to finish.
    pub async fn reset_conversation(&self, id: &ConversationId, user_id: &str) {
        self.sessions.reset(id, user_id).await;
    }

    async fn run_cycle(
        &self,
        ctx: &mut ConversationContext,
        user_id: &str,
        trace: &mut CycleTrace,
    ) -> (CycleOutcome, String) {
        let mut state = CycleState::AwaitingDecision;

        loop {
            state = match state {
                CycleState::AwaitingDecision => self.await_decision(ctx, trace).await,
                CycleState::ExecutingTools(calls) => {
                    trace.round_trips += 1;
                    self.execute_tools(ctx, user_id, calls, trace).await;
                    CycleState::AwaitingDecision
                }
                CycleState::Terminal(outcome, reply) => return (outcome, reply),
            };
        }
    }

    async fn await_decision(
        &self,
        ctx: &mut ConversationContext,
        trace: &CycleTrace,
    ) -> CycleState {
        let tools: Vec<ToolDescriptor> = self
            .registry
            .list_for_tier(trace.tier)
            .into_iter()
            .cloned()
            .collect();

        let request = DecisionRequest {
            conversation_id: ctx.id.clone(),
            system_prompt: build_system_prompt(self.base_prompt.as_deref(), &tools, trace.tier),
            turns: ctx.window(self.limits.history_window).to_vec(),
            tools,
        };

        debug!(
            conversation_id = %ctx.id,
            round_trip = trace.round_trips,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Requesting decision"
        );

        let calls = match self.decide_with_retry(request).await {
            Ok(Decision::Reply(text)) => {
                return CycleState::Terminal(CycleOutcome::Replied, text);
            }
            Ok(Decision::Invoke(calls)) => calls,
            Err(e) => {
                error!(conversation_id = %ctx.id, error = %e, "Decision step failed");
                self.event_bus.publish(DomainEvent::DecisionFailed {
                    conversation_id: ctx.id.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return CycleState::Terminal(
                    CycleOutcome::DecisionFailed,
                    FALLBACK_REPLY.to_string(),
                );
            }
        };

        if trace.round_trips >= self.limits.max_round_trips {
            warn!(
                conversation_id = %ctx.id,
                max_round_trips = self.limits.max_round_trips,
                requested = calls.len(),
                "Round-trip budget exhausted"
            );
            return CycleState::Terminal(
                CycleOutcome::BudgetExhausted,
                BUDGET_EXHAUSTED_REPLY.to_string(),
            );
        }

        let calls = assign_call_ids(ctx, calls);
        for call in &calls {
            if let Err(e) = ctx.append(Turn::tool_call(call)) {
                error!(conversation_id = %ctx.id, error = %e, "Could not record tool call");
                return CycleState::Terminal(
                    CycleOutcome::DecisionFailed,
                    FALLBACK_REPLY.to_string(),
                );
            }
        }
        CycleState::ExecutingTools(calls)
    }

    /// Call the decision step, retrying once after a backoff when the error
    /// allows it. An empty tool-call list counts as a malformed decision.
    async fn decide_with_retry(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        match self.decide_once(request.clone()).await {
            Ok(decision) => Ok(decision),
            Err(e) if e.is_retryable() => {
                let delay = self.retry_delay(&e);
                warn!(
                    conversation_id = %request.conversation_id,
                    decision_step = self.decision.name(),
                    error = %e,
                    backoff_ms = delay.as_millis() as u64,
                    "Decision step failed, retrying once"
                );
                tokio::time::sleep(delay).await;
                self.decide_once(request).await
            }
            Err(e) => Err(e),
        }
    }

    /// Pause before the retry: the configured backoff, or the provider's
    /// `retry_after` hint if longer, never more than half the cycle budget.
    fn retry_delay(&self, error: &DecisionError) -> Duration {
        let hinted = match error {
            DecisionError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs)
            }
            _ => Duration::ZERO,
        };
        self.limits
            .decision_retry_backoff
            .max(hinted)
            .min(self.limits.cycle_timeout / 2)
    }

    async fn decide_once(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        match self.decision.decide(request).await? {
            Decision::Invoke(calls) if calls.is_empty() => Err(DecisionError::Malformed(
                "tool invocation requested with no calls".into(),
            )),
            decision => Ok(decision),
        }
    }

    /// Run calls in request order, recording exactly one result per call.
    async fn execute_tools(
        &self,
        ctx: &mut ConversationContext,
        user_id: &str,
        calls: Vec<ToolCall>,
        trace: &mut CycleTrace,
    ) {
        for call in calls {
            // Re-resolve so a downgrade since listing is honored.
            let tier = self.resolver.resolve_tier(user_id).await;
            trace.tier = tier;

            let start = Instant::now();
            let outcome = match tokio::time::timeout(
                self.limits.tool_timeout,
                self.registry.invoke(&call.name, call.arguments.clone(), tier),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.limits.tool_timeout.as_secs(),
                }),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let (turn, output, error) = match outcome {
                Ok(output) => {
                    debug!(
                        conversation_id = %ctx.id,
                        tool = %call.name,
                        duration_ms,
                        "Tool succeeded"
                    );
                    (
                        Turn::tool_result(&call.id, &call.name, output.content.clone()),
                        Some(output.content),
                        None,
                    )
                }
                Err(e) => {
                    warn!(
                        conversation_id = %ctx.id,
                        tool = %call.name,
                        tier = %tier,
                        error = %e,
                        "Tool failed"
                    );
                    (Turn::tool_error(&call.id, &call.name, e.to_string()), None, Some(e))
                }
            };

            if let Err(e) = ctx.append(turn) {
                error!(conversation_id = %ctx.id, error = %e, "Could not record tool result");
            }

            self.event_bus.publish(DomainEvent::ToolInvoked {
                conversation_id: ctx.id.to_string(),
                tool_name: call.name.clone(),
                success: error.is_none(),
                duration_ms,
                timestamp: Utc::now(),
            });

            trace.invocations.push(InvocationRecord {
                call_id: call.id,
                tool_name: call.name,
                arguments: call.arguments,
                tier,
                output,
                error,
                duration_ms,
            });
        }
    }
}

/// Give every call a correlation id unused in this conversation.
fn assign_call_ids(ctx: &ConversationContext, calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut batch = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() || ctx.has_call_id(&call.id) || !batch.insert(call.id.clone()) {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                batch.insert(call.id.clone());
            }
            call
        })
        .collect()
}

/// Answer every still-pending call with an error result.
fn close_pending(ctx: &mut ConversationContext, reason: &str) {
    for call in ctx.pending_tool_calls() {
        if let Err(e) = ctx.append(Turn::tool_error(&call.id, &call.name, reason)) {
            error!(conversation_id = %ctx.id, error = %e, "Could not close pending tool call");
        }
    }
}
