//! `qalam config`: Configuration management commands.

use qalam_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed and validated");

            let mut warnings = Vec::new();
            if config.instructions.backend == "none" {
                warnings.push("Instruction backend is 'none': learned instructions are not saved");
            }
            if !config.extraction.enabled {
                warnings.push("Extraction disabled: no instructions will be learned from chats");
            }
            if config.instructions.merge_threshold < 0.5 {
                warnings.push("merge_threshold below 0.5 merges loosely related instructions");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!(
                "   Sessions:      ttl {}s, max {}, {} messages / {} revisions",
                config.sessions.ttl_secs,
                config.sessions.max_sessions,
                config.sessions.max_messages,
                config.sessions.max_revisions
            );
            println!("   Sweep every:   {}s", config.sessions.sweep_interval_secs);
            println!(
                "   Instructions:  {} ({})",
                config.instructions.backend,
                config.instructions.snapshot_path().display()
            );
            println!(
                "   Merging:       threshold {:.2}, weights seq={:.1} tok={:.1}, {}",
                config.instructions.merge_threshold,
                config.instructions.sequence_weight,
                config.instructions.token_weight,
                config.instructions.text_policy
            );
            println!(
                "   Extraction:    {} (timeout {}s)",
                if config.extraction.enabled { "on" } else { "off" },
                config.extraction.timeout_secs
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
