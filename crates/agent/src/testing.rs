//! Test doubles for driving the dispatch engine without a model.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::time::Duration;
use tierbot_core::channel::{OutboundMessage, OutboundSender};
use tierbot_core::decision::{Decision, DecisionRequest, DecisionStep};
use tierbot_core::error::{ChannelError, DecisionError};
use tokio::sync::Mutex;

type DecideHook = Box<dyn Fn(&DecisionRequest) -> BoxFuture<'static, ()> + Send + Sync>;

/// A decision step that plays back a fixed script of decisions.
///
/// Every request is recorded. Once the script runs out, `decide` fails
/// with a malformed-decision error.
pub struct ScriptedDecisionStep {
    script: Mutex<VecDeque<Result<Decision, DecisionError>>>,
    requests: Mutex<Vec<DecisionRequest>>,
    hook: Mutex<Option<DecideHook>>,
    delay: Option<Duration>,
}

impl ScriptedDecisionStep {
    pub fn new(script: impl IntoIterator<Item = Result<Decision, DecisionError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            delay: None,
        }
    }

    /// A script of plain-text replies.
    pub fn replies<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(Decision::Reply(t.into()))))
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook` after each request is recorded and before it is answered.
    pub async fn on_decide<F>(&self, hook: F)
    where
        F: Fn(&DecisionRequest) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        *self.hook.lock().await = Some(Box::new(hook));
    }

    pub async fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl DecisionStep for ScriptedDecisionStep {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let pending_hook = self.hook.lock().await.as_ref().map(|hook| hook(&request));
        self.requests.lock().await.push(request);

        if let Some(fut) = pending_hook {
            fut.await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(DecisionError::Malformed("script exhausted".into())))
    }
}

/// An outbound sender that keeps everything it is asked to send.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

impl RecordingSender {
    /// A sender whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl OutboundSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::DeliveryFailed {
                recipient: message.to.clone(),
                reason: "recording sender set to fail".into(),
            });
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
