//! Tool trait and the tiered tool registry.
//!
//! Tools are what give the assistant the ability to act: do math, look
//! things up, generate media. Each tool describes itself with a
//! [`ToolDescriptor`] carrying its minimum subscription tier.
//!
//! The registry has two phases. A [`ToolRegistryBuilder`] is filled once at
//! startup; `build` freezes it into a [`ToolRegistry`] that has no mutation
//! API and is shared through `Arc` by every dispatch cycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{RegistrationError, ToolError};
use crate::tier::Tier;

/// Immutable metadata for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique registry key (e.g. "calculator")
    pub name: String,

    /// Short description shown to the decision step
    pub description: String,

    /// Free-text contract: what inputs it understands and what it returns
    #[serde(default)]
    pub capabilities: String,

    /// Lowest tier allowed to see and invoke this tool
    #[serde(default)]
    pub min_tier: Tier,

    /// Disabled tools are never exposed, whatever the caller's tier
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// JSON Schema describing the tool's arguments
    #[serde(default = "empty_schema")]
    pub parameters: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    /// Whether a caller at `tier` may see and invoke this tool.
    pub fn is_available_to(&self, tier: Tier) -> bool {
        self.enabled && tier.allows(self.min_tier)
    }

    /// Apply configuration overrides on top of the tool's own metadata.
    pub fn with_override(mut self, overrides: &ToolOverride) -> Self {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(min_tier) = overrides.min_tier {
            self.min_tier = min_tier;
        }
        self
    }
}

/// Operator overrides for a registered tool's gating metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tier: Option<Tier>,
}

/// A request from the decision step to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id linking the call to its result
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Successful output of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text handed back to the decision step
    pub content: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }
}

/// The core Tool trait.
///
/// Implementations must be safe for concurrent entry: the frozen registry
/// hands out `&self` to every conversation at once. Tools that hold state
/// synchronize it themselves.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's metadata, including its default gating.
    fn describe(&self) -> ToolDescriptor;

    /// Execute the tool with the given arguments.
    async fn process(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Startup-phase catalog. Rejects duplicate names.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under the name from its descriptor.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<&mut Self, RegistrationError> {
        let descriptor = tool.describe();
        self.insert(descriptor, Arc::from(tool))
    }

    /// Register a tool with gating overrides already applied.
    pub fn register_with(
        &mut self,
        tool: Box<dyn Tool>,
        overrides: &ToolOverride,
    ) -> Result<&mut Self, RegistrationError> {
        let descriptor = tool.describe().with_override(overrides);
        self.insert(descriptor, Arc::from(tool))
    }

    fn insert(
        &mut self,
        descriptor: ToolDescriptor,
        tool: Arc<dyn Tool>,
    ) -> Result<&mut Self, RegistrationError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistrationError::DuplicateTool(descriptor.name));
        }
        debug!(
            tool = %descriptor.name,
            min_tier = %descriptor.min_tier,
            enabled = descriptor.enabled,
            "Registered tool"
        );
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, tool });
        Ok(self)
    }

    /// Freeze the catalog.
    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }

    /// Apply per-tool overrides and freeze. An override for a name that was
    /// never registered is a configuration mistake and fails the build.
    pub fn build_with_overrides(
        mut self,
        overrides: &HashMap<String, ToolOverride>,
    ) -> Result<ToolRegistry, RegistrationError> {
        for (name, over) in overrides {
            let entry = self
                .tools
                .get_mut(name)
                .ok_or_else(|| RegistrationError::UnknownOverride(name.clone()))?;
            entry.descriptor = entry.descriptor.clone().with_override(over);
        }
        Ok(self.build())
    }
}

/// The frozen, read-only tool catalog.
///
/// Lookups need no locking. Tier eligibility is checked both when listing
/// and again when invoking, so a downgrade between the two is honored.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Get a tool's descriptor by name.
    pub fn get(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.tools
            .get(name)
            .map(|t| &t.descriptor)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Enabled tools visible at `tier`, ordered by name.
    pub fn list_for_tier(&self, tier: Tier) -> Vec<&ToolDescriptor> {
        self.tools
            .values()
            .map(|t| &t.descriptor)
            .filter(|d| d.is_available_to(tier))
            .collect()
    }

    /// Every registered descriptor, enabled or not, ordered by name.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool on behalf of a caller currently at `tier`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
        tier: Tier,
    ) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if !entry.descriptor.enabled {
            return Err(ToolError::Disabled(name.to_string()));
        }
        if !tier.allows(entry.descriptor.min_tier) {
            return Err(ToolError::AccessDenied {
                tool_name: name.to_string(),
                required: entry.descriptor.min_tier,
                actual: tier,
            });
        }

        match entry.tool.process(arguments).await {
            Ok(output) => Ok(output),
            Err(e @ (ToolError::ExecutionFailed { .. } | ToolError::InvalidArguments(_))) => {
                Err(e)
            }
            Err(other) => Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool {
        name: &'static str,
        min_tier: Tier,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name.into(),
                description: "Echoes back the input".into(),
                capabilities: "Returns the 'text' argument unchanged.".into(),
                min_tier: self.min_tier,
                enabled: true,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }

        async fn process(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'text'".into()))?;
            Ok(ToolOutput::text(text))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "broken".into(),
                description: "Always fails".into(),
                capabilities: String::new(),
                min_tier: Tier::Free,
                enabled: true,
                parameters: empty_schema(),
            }
        }

        async fn process(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Timeout {
                tool_name: "broken".into(),
                timeout_secs: 1,
            })
        }
    }

    fn echo(name: &'static str, min_tier: Tier) -> Box<dyn Tool> {
        Box::new(EchoTool { name, min_tier })
    }

    fn sample_registry() -> ToolRegistry {
        let mut builder = ToolRegistry::builder();
        builder
            .register(echo("zeta", Tier::Free))
            .unwrap()
            .register(echo("alpha", Tier::Plus))
            .unwrap()
            .register(echo("mid", Tier::Pro))
            .unwrap();
        builder.build()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo("echo", Tier::Free)).unwrap();
        let err = builder.register(echo("echo", Tier::Pro)).err().unwrap();
        assert_eq!(err, RegistrationError::DuplicateTool("echo".into()));
    }

    #[test]
    fn get_known_and_unknown() {
        let registry = sample_registry();
        assert_eq!(registry.get("alpha").unwrap().min_tier, Tier::Plus);
        assert!(matches!(registry.get("nope"), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn list_for_tier_is_sorted_and_filtered() {
        let registry = sample_registry();
        let names = |tier| {
            registry
                .list_for_tier(tier)
                .iter()
                .map(|d| d.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(Tier::Free), vec!["zeta"]);
        assert_eq!(names(Tier::Plus), vec!["alpha", "zeta"]);
        assert_eq!(names(Tier::Pro), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn visibility_is_monotonic_in_tier() {
        let registry = sample_registry();
        for (i, low) in Tier::ALL.iter().enumerate() {
            for high in &Tier::ALL[i..] {
                let lower = registry.list_for_tier(*low);
                let higher = registry.list_for_tier(*high);
                assert!(lower.iter().all(|d| higher.contains(d)));
            }
        }
    }

    #[test]
    fn disabled_tools_are_never_listed() {
        let mut builder = ToolRegistry::builder();
        builder
            .register_with(
                echo("hidden", Tier::Free),
                &ToolOverride {
                    enabled: Some(false),
                    min_tier: None,
                },
            )
            .unwrap();
        let registry = builder.build();
        for tier in Tier::ALL {
            assert!(registry.list_for_tier(tier).is_empty());
        }
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn overrides_for_unknown_tools_fail_the_build() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo("echo", Tier::Free)).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("ghost".to_string(), ToolOverride::default());
        let err = builder.build_with_overrides(&overrides).err().unwrap();
        assert_eq!(err, RegistrationError::UnknownOverride("ghost".into()));
    }

    #[test]
    fn overrides_regate_tools() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo("echo", Tier::Free)).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(
            "echo".to_string(),
            ToolOverride {
                enabled: None,
                min_tier: Some(Tier::Pro),
            },
        );
        let registry = builder.build_with_overrides(&overrides).unwrap();
        assert!(registry.list_for_tier(Tier::Plus).is_empty());
        assert_eq!(registry.list_for_tier(Tier::Pro).len(), 1);
    }

    #[tokio::test]
    async fn invoke_runs_eligible_tool() {
        let registry = sample_registry();
        let out = registry
            .invoke("alpha", serde_json::json!({"text": "hello world"}), Tier::Pro)
            .await
            .unwrap();
        assert_eq!(out.content, "hello world");
    }

    #[tokio::test]
    async fn invoke_revalidates_tier_after_listing() {
        let registry = sample_registry();
        // Listed while the caller was pro...
        assert!(registry.list_for_tier(Tier::Pro).iter().any(|d| d.name == "mid"));
        // ...then invoked after a downgrade.
        let err = registry
            .invoke("mid", serde_json::json!({"text": "x"}), Tier::Free)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::AccessDenied {
                required: Tier::Pro,
                actual: Tier::Free,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invoke_unknown_and_disabled() {
        let mut builder = ToolRegistry::builder();
        builder
            .register_with(
                echo("off", Tier::Free),
                &ToolOverride {
                    enabled: Some(false),
                    min_tier: None,
                },
            )
            .unwrap();
        let registry = builder.build();

        let err = registry
            .invoke("missing", serde_json::json!({}), Tier::Pro)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));

        let err = registry
            .invoke("off", serde_json::json!({"text": "x"}), Tier::Pro)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Disabled(_)));
    }

    #[tokio::test]
    async fn tool_specific_errors_are_wrapped() {
        let mut builder = ToolRegistry::builder();
        builder.register(Box::new(BrokenTool)).unwrap();
        let registry = builder.build();
        let err = registry
            .invoke("broken", serde_json::json!({}), Tier::Free)
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "broken");
                assert!(reason.contains("timed out"));
            }
            other => panic!("Expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_arguments_pass_through() {
        let registry = sample_registry();
        let err = registry
            .invoke("zeta", serde_json::json!({}), Tier::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
