//! OpenAI-compatible decision step.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions` with function calling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tierbot_core::conversation::{Turn, TurnRole};
use tierbot_core::decision::{Decision, DecisionRequest, DecisionStep};
use tierbot_core::error::DecisionError;
use tierbot_core::tool::{ToolCall, ToolDescriptor};
use tracing::{debug, warn};

/// A decision step backed by an OpenAI-compatible chat completions API.
pub struct OpenAiCompatDecisionStep {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatDecisionStep {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, DecisionError> {
        Self::with_timeout(name, base_url, api_key, model, Duration::from_secs(120))
    }

    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecisionError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
        })
    }

    /// OpenAI's hosted API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, DecisionError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    pub fn openrouter(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, DecisionError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, model)
    }

    /// A local Ollama server (no real key needed).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, DecisionError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
            model,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Map conversation turns onto chat messages.
    ///
    /// Consecutive tool_call turns become one assistant message carrying all
    /// of their `tool_calls`; each tool_result becomes a `tool` message.
    fn to_api_messages(system_prompt: &str, turns: &[Turn]) -> Vec<ApiMessage> {
        let mut messages = vec![ApiMessage::text("system", system_prompt)];

        for turn in turns {
            match turn.role {
                TurnRole::User => messages.push(ApiMessage::text("user", &turn.content)),
                TurnRole::Assistant => {
                    messages.push(ApiMessage::text("assistant", &turn.content))
                }
                TurnRole::ToolCall => {
                    let call = ApiToolCall {
                        id: turn.call_id.clone().unwrap_or_default(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: turn.tool_name.clone().unwrap_or_default(),
                            arguments: turn
                                .arguments
                                .as_ref()
                                .map(|a| a.to_string())
                                .unwrap_or_else(|| "{}".into()),
                        },
                    };
                    match messages.last_mut() {
                        Some(last) if last.role == "assistant" && last.tool_calls.is_some() => {
                            if let Some(calls) = last.tool_calls.as_mut() {
                                calls.push(call);
                            }
                        }
                        _ => messages.push(ApiMessage {
                            role: "assistant".into(),
                            content: None,
                            tool_calls: Some(vec![call]),
                            tool_call_id: None,
                        }),
                    }
                }
                TurnRole::ToolResult => {
                    let content = if turn.is_error {
                        format!("Error: {}", turn.content)
                    } else {
                        turn.content.clone()
                    };
                    messages.push(ApiMessage {
                        role: "tool".into(),
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: turn.call_id.clone(),
                    });
                }
            }
        }

        messages
    }

    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: if t.capabilities.is_empty() {
                        t.description.clone()
                    } else {
                        format!("{}. {}", t.description.trim_end_matches('.'), t.capabilities)
                    },
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Turn the first choice of a completion into a decision.
    fn to_decision(response: ApiResponse) -> Result<Decision, DecisionError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DecisionError::Malformed("No choices in response".into()))?;

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        if !tool_calls.is_empty() {
            let mut seen = HashSet::new();
            let calls = tool_calls
                .into_iter()
                .map(|tc| {
                    let arguments = if tc.function.arguments.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&tc.function.arguments).map_err(|e| {
                            DecisionError::Malformed(format!(
                                "Arguments for {} are not JSON: {e}",
                                tc.function.name
                            ))
                        })?
                    };
                    let id = if tc.id.is_empty() || !seen.insert(tc.id.clone()) {
                        format!("call_{}", uuid::Uuid::new_v4().simple())
                    } else {
                        tc.id
                    };
                    Ok(ToolCall::new(id, tc.function.name, arguments))
                })
                .collect::<Result<Vec<_>, DecisionError>>()?;
            return Ok(Decision::Invoke(calls));
        }

        match choice.message.content {
            Some(text) if !text.trim().is_empty() => Ok(Decision::Reply(text)),
            _ => Err(DecisionError::Malformed(
                "Response carried neither text nor tool calls".into(),
            )),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

fn network_error(e: reqwest::Error) -> DecisionError {
    if e.is_timeout() {
        DecisionError::Timeout(e.to_string())
    } else {
        DecisionError::Network(e.to_string())
    }
}

#[async_trait]
impl DecisionStep for OpenAiCompatDecisionStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.system_prompt, &request.turns),
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(
            decision_step = %self.name,
            model = %self.model,
            conversation_id = %request.conversation_id,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(DecisionError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(DecisionError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Decision endpoint returned error");
            return Err(DecisionError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::Malformed(format!("Failed to parse response: {e}")))?;

        Self::to_decision(api_response)
    }

    async fn health_check(&self) -> Result<bool, DecisionError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(network_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierbot_core::tier::Tier;

    fn parse(json: &str) -> Result<Decision, DecisionError> {
        let response: ApiResponse = serde_json::from_str(json).unwrap();
        OpenAiCompatDecisionStep::to_decision(response)
    }

    #[test]
    fn constructors() {
        let step = OpenAiCompatDecisionStep::openrouter("sk-test", "openai/gpt-4o").unwrap();
        assert_eq!(step.name(), "openrouter");
        assert!(step.base_url().contains("openrouter.ai"));

        let step = OpenAiCompatDecisionStep::ollama(None, "llama3").unwrap();
        assert!(step.base_url().contains("localhost:11434"));
        assert_eq!(step.model(), "llama3");

        let step = OpenAiCompatDecisionStep::new("custom", "http://x/v1/", "k", "m").unwrap();
        assert_eq!(step.base_url(), "http://x/v1");
    }

    #[test]
    fn tool_call_turns_are_grouped() {
        let a = ToolCall::new("call_a", "calculator", serde_json::json!({"expression": "1+1"}));
        let b = ToolCall::new("call_b", "echo", serde_json::json!({"text": "hi"}));
        let turns = vec![
            Turn::user("do both"),
            Turn::tool_call(&a),
            Turn::tool_call(&b),
            Turn::tool_result("call_a", "calculator", "The result is: 2"),
            Turn::tool_error("call_b", "echo", "boom"),
            Turn::assistant("done"),
        ];

        let messages = OpenAiCompatDecisionStep::to_api_messages("sys", &turns);
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "tool", "assistant"]);

        let calls = messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].function.name, "echo");
        assert!(messages[2].content.is_none());

        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(messages[4].content.as_deref(), Some("Error: boom"));
    }

    #[test]
    fn tool_definitions_include_capabilities() {
        let descriptor = ToolDescriptor {
            name: "calculator".into(),
            description: "Perform basic math calculations".into(),
            capabilities: "Supports + and -.".into(),
            min_tier: Tier::Free,
            enabled: true,
            parameters: serde_json::json!({"type": "object"}),
        };
        let tools = OpenAiCompatDecisionStep::to_api_tools(&[descriptor]);
        assert_eq!(tools[0].r#type, "function");
        assert_eq!(
            tools[0].function.description,
            "Perform basic math calculations. Supports + and -."
        );
    }

    #[test]
    fn text_response_is_reply() {
        let decision = parse(r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#);
        assert_eq!(decision.unwrap(), Decision::Reply("Hello!".into()));
    }

    #[test]
    fn tool_call_response_is_invoke() {
        let decision = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                {"id":"call_1","type":"function","function":{"name":"calculator","arguments":"{\"expression\":\"2+2\"}"}}
            ]}}]}"#,
        )
        .unwrap();
        match decision {
            Decision::Invoke(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].arguments["expression"], "2+2");
            }
            other => panic!("Expected Invoke, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_call_ids_are_replaced() {
        let decision = parse(
            r#"{"choices":[{"message":{"role":"assistant","tool_calls":[
                {"id":"dup","type":"function","function":{"name":"echo","arguments":"{}"}},
                {"id":"dup","type":"function","function":{"name":"echo","arguments":""}}
            ]}}]}"#,
        )
        .unwrap();
        let Decision::Invoke(calls) = decision else {
            panic!("Expected Invoke");
        };
        assert_eq!(calls[0].id, "dup");
        assert_ne!(calls[1].id, "dup");
        assert!(calls[1].id.starts_with("call_"));
    }

    #[test]
    fn malformed_responses() {
        assert!(matches!(parse(r#"{"choices":[]}"#), Err(DecisionError::Malformed(_))));
        assert!(matches!(
            parse(r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#),
            Err(DecisionError::Malformed(_))
        ));
        assert!(matches!(
            parse(
                r#"{"choices":[{"message":{"role":"assistant","tool_calls":[
                    {"id":"c","type":"function","function":{"name":"echo","arguments":"{not json"}}
                ]}}]}"#
            ),
            Err(DecisionError::Malformed(_))
        ));
    }
}
