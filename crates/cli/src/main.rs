//! Qalam CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Initialize config directory and default config
//! - `chat`: Interactive or single-message editing session
//! - `instructions`: Inspect and maintain learned instructions
//! - `config`: Validate or print the configuration
//! - `doctor`: Diagnose setup

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "qalam",
    about = "Qalam: letter-writing sessions with learned preferences",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Start an editing session
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// What the letter is about
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Manage learned instructions
    Instructions {
        #[command(subcommand)]
        action: InstructionsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose system health
    Doctor,
}

#[derive(Subcommand)]
enum InstructionsAction {
    /// List active instructions
    List {
        /// Only this category (style, format, content, tone, general)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Teach an instruction directly
    Add { category: String, text: String },

    /// Soft-delete an instruction by id
    Forget { id: String },

    /// Merge near-duplicates across the whole store
    Optimize,

    /// Drop forgotten and stale, rarely used instructions
    Compact,

    /// Print the block handed to letter generation
    Prompt {
        /// Maximum instructions to include
        #[arg(short, long)]
        max: Option<usize>,
    },

    /// Per-category counts
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the config file
    Validate,

    /// Print the effective configuration
    Show,

    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, context } => commands::chat::run(message, context).await?,
        Commands::Instructions { action } => match action {
            InstructionsAction::List { category } => {
                commands::instructions::list(category.as_deref()).await?
            }
            InstructionsAction::Add { category, text } => {
                commands::instructions::add(&category, &text).await?
            }
            InstructionsAction::Forget { id } => commands::instructions::forget(&id).await?,
            InstructionsAction::Optimize => commands::instructions::optimize().await?,
            InstructionsAction::Compact => commands::instructions::compact().await?,
            InstructionsAction::Prompt { max } => commands::instructions::prompt(max).await?,
            InstructionsAction::Stats => commands::instructions::stats().await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
