//! CLI channel: interactive terminal chat.
//!
//! Reads lines from stdin and prints replies to stdout. Used by
//! `tierbot chat`. Input and output can be swapped for tests.

use async_trait::async_trait;
use tierbot_core::channel::{Channel, InboundMessage, OutboundMessage, OutboundSender};
use tierbot_core::conversation::ConversationId;
use tierbot_core::error::ChannelError;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Words that end an interactive session.
const EXIT_WORDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    user_id: String,
    conversation_id: ConversationId,
    input: Mutex<Option<Input>>,
    output: Mutex<Output>,
}

impl CliChannel {
    /// A channel over the process's stdin and stdout.
    pub fn new(user_id: impl Into<String>, conversation_id: ConversationId) -> Self {
        Self::with_io(
            user_id,
            conversation_id,
            BufReader::new(io::stdin()),
            io::stdout(),
        )
    }

    pub fn with_io(
        user_id: impl Into<String>,
        conversation_id: ConversationId,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id,
            input: Mutex::new(Some(Box::new(input))),
            output: Mutex::new(Box::new(output)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Text printed for one outbound part.
    fn render(message: &OutboundMessage) -> String {
        if message.total_parts > 1 {
            format!(
                "{} [{}/{}]\n",
                message.text, message.part, message.total_parts
            )
        } else {
            format!("{}\n", message.text)
        }
    }
}

#[async_trait]
impl OutboundSender for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let mut out = self.output.lock().await;
        out.write_all(Self::render(message).as_bytes())
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                recipient: message.to.clone(),
                reason: e.to_string(),
            })?;
        out.flush().await.map_err(|e| ChannelError::DeliveryFailed {
            recipient: message.to.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Channel for CliChannel {
    /// Spawn the line reader. Can only be started once.
    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let input = self
            .input
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::NotConfigured("cli channel already started".into()))?;

        let (tx, rx) = mpsc::channel(32);
        let user_id = self.user_id.clone();
        let conversation_id = self.conversation_id.clone();

        tokio::spawn(async move {
            let mut lines = input.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        if EXIT_WORDS.contains(&line) {
                            debug!("CLI session ended by user");
                            break;
                        }

                        let msg = InboundMessage::new(user_id.as_str(), conversation_id.clone(), line);
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx
                            .send(Err(ChannelError::ConnectionLost(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}
