//! `tierbot chat`: interactive or single-message chat.

use std::io::Write;
use std::sync::Arc;
use tierbot_agent::Runtime;
use tierbot_channels::CliChannel;
use tierbot_config::AppConfig;
use tierbot_core::channel::{Channel, InboundMessage};
use tierbot_core::conversation::ConversationId;
use tierbot_core::tier::SubscriptionStore;

/// Typed in interactive mode to start over.
const RESET_COMMAND: &str = "/new";

pub async fn run(
    config: &AppConfig,
    user: String,
    conversation: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let decision = match tierbot_providers::build_from_config(&config.decision) {
        Ok(step) => step,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set TIERBOT_API_KEY (or OPENAI_API_KEY), or add it to:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            return Err("Decision step not configured. See above for setup instructions.".into());
        }
    };

    let runtime = Runtime::from_config(config, Arc::new(decision))?;
    let engine = runtime.engine;

    let conversation_id = ConversationId::from(conversation.as_deref().unwrap_or(user.as_str()));
    let channel = CliChannel::new(user.as_str(), conversation_id.clone());

    if let Some(text) = message {
        eprint!("  Thinking...");
        let inbound = InboundMessage::new(user.as_str(), conversation_id, text);
        let result = engine.respond(inbound, &channel).await;
        eprint!("\r              \r");
        result?;
        return Ok(());
    }

    let tier = runtime
        .subscriptions
        .lookup(&user)
        .await
        .ok()
        .flatten()
        .map(|u| u.effective_tier())
        .unwrap_or_default();

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        tierbot, interactive mode             ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:      {}", config.decision.provider);
    println!("  Model:         {}", config.decision.model);
    println!("  User:          {user} ({tier} plan)");
    println!("  Conversation:  {}", conversation_id.0);
    println!(
        "  Tools:         {}",
        engine
            .registry()
            .list_for_tier(tier)
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '{RESET_COMMAND}' to start over, 'exit' or Ctrl+D to quit.");
    println!();

    let mut rx = channel
        .start()
        .await
        .map_err(|e| format!("Channel error: {e}"))?;

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(result) = rx.recv().await {
        match result {
            Ok(inbound) if inbound.text == RESET_COMMAND => {
                engine
                    .reset_conversation(&inbound.conversation_id, &inbound.user_id)
                    .await;
                println!("  (conversation cleared)");
            }
            Ok(inbound) => {
                eprint!("  ...");
                let outcome = engine.respond(inbound, &channel).await;
                eprint!("\r     \r");
                match outcome {
                    Ok(result) => tracing::debug!(
                        outcome = %result.outcome,
                        round_trips = result.round_trips,
                        tools = result.invocations.len(),
                        "Cycle finished"
                    ),
                    Err(e) => eprintln!("  [Delivery Error] {e}"),
                }
            }
            Err(e) => {
                eprintln!("  [Channel Error] {e}");
                break;
            }
        }

        println!();
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}
