//! `qalam chat`: Interactive or single-message editing session.
//!
//! Messages are recorded in a session and scanned for writing preferences,
//! which are saved to the instruction store. Lines starting with `/draft`
//! record a new revision of the letter; `/prompt` shows what has been
//! learned so far.

use std::sync::Arc;

use qalam_agent::{KeywordExtractor, Orchestrator, build_from_config};
use qalam_config::AppConfig;
use qalam_core::event::EventBus;
use qalam_core::message::{Role, SessionId};
use qalam_session::SessionSweeper;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    context: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let events = Arc::new(EventBus::default());
    let orch = build_from_config(&config, Arc::new(KeywordExtractor::new()), events).await?;
    let max_items = config.instructions.prompt_max_items;

    let session_id = orch.create_session(context.clone())?;

    if let Some(msg) = message {
        // Single message mode
        let (_, learning) = orch.handle_message_and_wait(&session_id, Role::User, &msg)?;
        if let Some(handle) = learning {
            handle.await?;
        }
        print_prompt_block(&orch, max_items).await;
        orch.instructions().flush().await?;
        return Ok(());
    }

    let sweeper = SessionSweeper::start(orch.sessions().clone(), config.sessions.sweep_interval());

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         Qalam: Interactive Session           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Session:   {session_id}");
    if let Some(ctx) = &context {
        println!("  Context:   {ctx}");
    }
    println!("  Backend:   {}", config.instructions.backend);
    println!();
    println!("  Type a message and press Enter.");
    println!("  /draft <text> records a revision, /prompt shows learned preferences.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt_marker()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt_marker()?;
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        if let Err(e) = handle_line(&orch, &session_id, line, max_items).await {
            eprintln!("  [Error] {e}");
            if matches!(
                orch.sessions().get(&session_id),
                Err(qalam_core::error::SessionError::NotFound(_))
            ) {
                eprintln!("  Session expired. Start a new one with `qalam chat`.");
                break;
            }
        }
        prompt_marker()?;
    }

    sweeper.stop().await;
    orch.instructions().flush().await?;

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

async fn handle_line(
    orch: &Orchestrator,
    session_id: &SessionId,
    line: &str,
    max_items: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(draft) = line.strip_prefix("/draft") {
        let version = orch.record_revision(session_id, draft.trim())?;
        println!("  Qalam > Saved draft v{version}");
        return Ok(());
    }
    if line == "/prompt" {
        print_prompt_block(orch, max_items).await;
        return Ok(());
    }

    let before = orch.instructions().snapshot().await;
    let (session, learning) = orch.handle_message_and_wait(session_id, Role::User, line)?;
    if let Some(handle) = learning {
        handle.await?;
    }
    let after = orch.instructions().snapshot().await;

    let learned = after.iter().find(|r| !before.contains(r));
    match learned {
        Some(record) if record.usage_count > 1 => println!(
            "  Qalam > Noted again ({}, seen {} times): {}",
            record.category, record.usage_count, record.raw_text
        ),
        Some(record) => println!("  Qalam > Learned ({}): {}", record.category, record.raw_text),
        None => println!("  Qalam > Noted ({} messages in session)", session.messages.len()),
    }
    Ok(())
}

async fn print_prompt_block(orch: &Orchestrator, max_items: usize) {
    let block = orch.prompt_block(max_items).await;
    if block.is_empty() {
        println!("  (no learned preferences yet)");
    } else {
        println!("{block}");
    }
}

fn prompt_marker() -> std::io::Result<()> {
    use std::io::Write;
    print!("  You > ");
    std::io::stdout().flush()
}
