//! Built-in tool implementations for tierbot.
//!
//! Every built-in tool is free-tier by default; deployments gate them
//! higher through the `[tools]` section of the config.

pub mod calculator;
pub mod echo;

use std::collections::HashMap;
use tierbot_core::error::RegistrationError;
use tierbot_core::tool::{ToolOverride, ToolRegistry};

/// Build the frozen registry of built-in tools with config overrides applied.
///
/// An override naming a tool that does not exist fails the build.
pub fn default_registry(
    overrides: &HashMap<String, ToolOverride>,
) -> Result<ToolRegistry, RegistrationError> {
    let mut builder = ToolRegistry::builder();
    builder
        .register(Box::new(calculator::CalculatorTool))?
        .register(Box::new(echo::EchoTool))?;
    let registry = builder.build_with_overrides(overrides)?;
    tracing::debug!(tools = registry.len(), "Built-in tool registry ready");
    Ok(registry)
}
