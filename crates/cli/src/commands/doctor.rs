//! `tierbot doctor`: diagnose configuration and connectivity.

use std::path::Path;
use tierbot_config::AppConfig;
use tierbot_core::decision::DecisionStep;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 tierbot doctor: system diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    if !config_path.exists() {
        println!(
            "  ⚠️  No config file at {}, using defaults (run `tierbot config --init`)",
            config_path.display()
        );
        issues += 1;
    }

    let config = match AppConfig::load_with_env(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 blocking issue found. Fix the config and re-run.");
            return Ok(());
        }
    };

    match tierbot_tools::default_registry(&config.tools) {
        Ok(registry) => println!("  ✅ Tool catalog built ({} tools)", registry.len()),
        Err(e) => {
            println!("  ❌ Tool catalog: {e}");
            issues += 1;
        }
    }

    println!(
        "  ✅ {} seeded subscriber(s), lookup timeout {}ms",
        config.subscription.users.len(),
        config.subscription.lookup_timeout_ms
    );

    if config.has_api_key() || config.decision.provider == "ollama" {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key configured (set TIERBOT_API_KEY or decision.api_key)");
        issues += 1;
    }

    match tierbot_providers::build_from_config(&config.decision) {
        Ok(step) => match step.health_check().await {
            Ok(true) => println!("  ✅ Decision endpoint reachable ({})", step.base_url()),
            Ok(false) => {
                println!("  ⚠️  Decision endpoint unhealthy ({})", step.base_url());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Decision endpoint: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Decision step: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
