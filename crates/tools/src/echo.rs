//! Echo tool: a demo capability that acknowledges the text it receives.

use async_trait::async_trait;
use tierbot_core::error::ToolError;
use tierbot_core::tier::Tier;
use tierbot_core::tool::{Tool, ToolDescriptor, ToolOutput};

pub const NAME: &str = "echo";

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: NAME.into(),
            description: "Example tool that processes text".into(),
            capabilities: "Repeats the given text back, prefixed with 'Processed:'.".into(),
            min_tier: Tier::Free,
            enabled: true,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to process" }
                },
                "required": ["text"]
            }),
        }
    }

    async fn process(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("echo needs a 'text' argument".into()))?;
        Ok(ToolOutput::text(format!("Processed: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_with_prefix() {
        let out = EchoTool
            .process(serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Processed: hello");
    }

    #[tokio::test]
    async fn missing_text_is_invalid() {
        assert!(matches!(
            EchoTool.process(serde_json::json!({"txt": 1})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
