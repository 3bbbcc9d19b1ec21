//! System prompt construction.

use tierbot_core::tier::Tier;
use tierbot_core::tool::ToolDescriptor;

/// Built-in base instructions, used unless config overrides them.
pub const DEFAULT_BASE_PROMPT: &str = "You are a smart, friendly and helpful messaging assistant. \
Keep replies concise and chat-friendly, and avoid very long answers unless they are needed.";

/// Build the system prompt for a caller at `tier` who can see `tools`.
///
/// The tool section is always appended, even when the base is overridden.
pub fn build_system_prompt(base: Option<&str>, tools: &[ToolDescriptor], tier: Tier) -> String {
    let mut prompt = base.unwrap_or(DEFAULT_BASE_PROMPT).trim_end().to_string();

    if tools.is_empty() {
        prompt.push_str(&format!(
            "\n\nNote: the user is on the {tier} plan, which currently includes no tools. \
             If they ask for calculations or other advanced features, politely explain that \
             this feature is not available on their current plan."
        ));
        return prompt;
    }

    prompt.push_str("\n\nTool usage rules:\n");
    prompt.push_str(&format!(
        "- You have access to the following tools: {}\n",
        tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    for tool in tools {
        prompt.push_str(&format!("- {}: {}", tool.name, tool.description));
        if !tool.capabilities.is_empty() {
            prompt.push_str(&format!(" ({})", tool.capabilities));
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "- Call a tool whenever the request needs it; never invent a tool's result.\n\
         - If a tool reports an error, apologize briefly and explain in plain words.",
    );
    prompt
}
