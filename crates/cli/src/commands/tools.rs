//! `tierbot tools`: list the tool catalog.

use tierbot_config::AppConfig;
use tierbot_core::tier::Tier;

pub fn run(config: &AppConfig, tier: Option<Tier>) -> Result<(), Box<dyn std::error::Error>> {
    let registry = tierbot_tools::default_registry(&config.tools)?;

    let tools = match tier {
        Some(tier) => {
            println!("Tools available on the {tier} plan:");
            registry.list_for_tier(tier)
        }
        None => {
            println!("All registered tools:");
            registry.descriptors()
        }
    };

    if tools.is_empty() {
        println!("  (none)");
    }
    for tool in tools {
        let status = if tool.enabled { "" } else { " [disabled]" };
        println!(
            "  {:<12} {:<5} {}{status}",
            tool.name,
            tool.min_tier.as_str(),
            tool.description
        );
    }

    Ok(())
}
