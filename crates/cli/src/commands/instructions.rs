//! `qalam instructions`: Learned instruction management.

use qalam_agent::{compact_policy, open_instruction_store};
use qalam_config::AppConfig;
use qalam_core::instruction::Category;

fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub async fn list(category: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;
    let category = category.map(str::parse::<Category>).transpose()?;

    let records = store.list_active(category).await;
    if records.is_empty() {
        println!("No active instructions.");
        return Ok(());
    }

    println!("📚 Active instructions ({})", records.len());
    println!();
    for r in &records {
        println!(
            "  [{:<7}] {:>3}×  {}  ({})",
            r.category.as_str(),
            r.usage_count,
            r.raw_text,
            r.id
        );
    }
    Ok(())
}

pub async fn add(category: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    let record = store.upsert_str(category, text).await?;
    store.flush().await?;

    if record.usage_count > 1 {
        println!(
            "🔁 Merged into existing instruction {} (used {} times): {}",
            record.id, record.usage_count, record.raw_text
        );
    } else {
        println!("✅ Added instruction {}: {}", record.id, record.raw_text);
    }
    Ok(())
}

pub async fn forget(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    let record = store.deactivate(id).await?;
    store.flush().await?;
    println!("🗑️  Forgot: {}", record.raw_text);
    Ok(())
}

pub async fn optimize() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    let removed = store.optimize().await;
    store.flush().await?;
    println!("🧹 Merged {removed} duplicate instruction(s)");
    Ok(())
}

pub async fn compact() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    let removed = store.compact(compact_policy(&config.instructions)).await;
    store.flush().await?;
    println!("🧹 Removed {removed} forgotten or stale instruction(s)");
    Ok(())
}

pub async fn prompt(max: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    let block = store
        .format_for_prompt(max.unwrap_or(config.instructions.prompt_max_items))
        .await;
    if block.is_empty() {
        println!("(no learned preferences yet)");
    } else {
        print!("{block}");
    }
    Ok(())
}

pub async fn stats() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_instruction_store(&config.instructions).await?;

    println!("🧠 Instruction Statistics");
    println!("=========================");
    println!("  Backend:    {}", config.instructions.backend);
    if config.instructions.backend == "file" {
        println!("  Snapshot:   {}", config.instructions.snapshot_path().display());
    }
    println!("  Threshold:  {:.2}", config.instructions.merge_threshold);
    println!();
    println!("  {:<8} {:>6} {:>9} {:>7}", "category", "active", "forgotten", "usage");
    for s in store.stats().await {
        println!(
            "  {:<8} {:>6} {:>9} {:>7}",
            s.category.as_str(),
            s.active,
            s.inactive,
            s.total_usage
        );
    }
    Ok(())
}
