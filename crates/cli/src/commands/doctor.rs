//! `qalam doctor`: Diagnose setup.

use qalam_config::AppConfig;
use qalam_core::instruction::InstructionBackend;
use qalam_memory::{FileBackend, TextNormalizer};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Qalam Doctor: System Diagnostics");
    println!("===================================\n");

    let mut issues = 0;

    println!("  ✅ Qalam binary running");

    let config_path = AppConfig::config_dir().join("config.toml");
    let config = if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid");
                Some(config)
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
                None
            }
        }
    } else {
        println!("  ⚠️  No config file: run `qalam onboard` (using defaults)");
        issues += 1;
        Some(AppConfig::default())
    };

    if let Some(config) = config {
        if config.instructions.backend == "file" {
            let path = config.instructions.snapshot_path();
            if !path.exists() {
                println!("  ✅ No instruction snapshot yet ({})", path.display());
            } else {
                match FileBackend::new(&path).load().await {
                    Ok(records) => {
                        let active = records.iter().filter(|r| r.active).count();
                        println!(
                            "  ✅ Instruction snapshot readable: {} records ({active} active)",
                            records.len()
                        );
                    }
                    Err(e) => {
                        println!("  ❌ Instruction snapshot unreadable: {e}");
                        issues += 1;
                    }
                }
            }
        } else {
            println!(
                "  ✅ Instruction backend '{}' needs no file",
                config.instructions.backend
            );
        }
    }

    let rules = TextNormalizer::default().rules().len();
    println!("  ✅ Normalizer loaded with {rules} canonical rules");

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
