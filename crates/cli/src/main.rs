//! Steward CLI, the main entry point.
//!
//! Commands:
//! - `onboard`    Write a default config
//! - `chat`       Interactive or single-message chat through the router
//! - `memory`     Inspect stored preferences, rules, history and handoffs
//! - `workflows`  List or import stored workflows and templates

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Steward, a task assistant with layered memory",
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

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Session id; a new one is generated when omitted
        #[arg(long)]
        session: Option<String>,

        /// User id
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Inspect memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,

        /// User id
        #[arg(long, default_value = "local", global = true)]
        user: String,
    },

    /// Manage stored workflows and templates
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Stored preferences, highest confidence first
    Preferences,

    /// Learned rules in match precedence
    Rules,

    /// Recent activity
    History {
        /// Search by meaning instead of listing
        #[arg(long)]
        semantic: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Pending and claimed handoffs
    Handoffs,
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Stored workflows and templates
    List,

    /// Import workflows and templates from a TOML file
    Import { file: std::path::PathBuf },
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
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, session, user } => commands::chat::run(message, session, user).await?,
        Commands::Memory { action, user } => match action {
            MemoryAction::Preferences => commands::memory::preferences(&user).await?,
            MemoryAction::Rules => commands::memory::rules(&user).await?,
            MemoryAction::History { semantic, limit } => {
                commands::memory::history(&user, semantic.as_deref(), limit).await?
            }
            MemoryAction::Handoffs => commands::memory::handoffs().await?,
        },
        Commands::Workflows { action } => match action {
            WorkflowAction::List => commands::workflows::list().await?,
            WorkflowAction::Import { file } => commands::workflows::import(&file).await?,
        },
    }

    Ok(())
}
