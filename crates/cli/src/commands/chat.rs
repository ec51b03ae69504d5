//! `steward chat`: interactive or single-message routing.

use std::sync::Arc;
use steward_agent::{Router, TurnRequest, TurnResult};
use steward_config::AppConfig;
use steward_core::message::Message;
use steward_tools::{InMemoryTaskStore, default_catalogue};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::{CliResult, load_config, open_memory};

/// Build the router the same way for every entry point.
pub async fn build_router(config: &AppConfig) -> CliResult<Router> {
    let providers = steward_providers::router::build_from_config(config);
    let provider = providers.default().ok_or("No default provider configured")?;
    let embedder = steward_providers::router::build_embedder(config, provider.clone());

    let memory = open_memory(config, embedder).await?;
    // Tasks and projects live for the process only; memory is durable
    let task_store = Arc::new(InMemoryTaskStore::new());
    let tools = Arc::new(default_catalogue(task_store.clone(), memory.clone()));

    if config.discovery.enabled {
        warn!("discovery is enabled but no capability catalogue is configured; external requests will be reported as unavailable");
    }

    Ok(Router::new(provider, &config.default_model, tools, task_store, memory).with_config(config))
}

fn print_result(result: &TurnResult) {
    for line in result.response.lines() {
        println!("  Steward > {line}");
    }
    if let Some(tier) = result.tier {
        tracing::debug!(tier = %tier, outcome = ?result.outcome, tools = result.tool_calls.len(), "Turn finished");
    }
    for error in &result.side_effects.errors {
        eprintln!("  [memory] {error}");
    }
}

pub async fn run(message: Option<String>, session: Option<String>, user: String) -> CliResult {
    let config = load_config()?;

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set STEWARD_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY,");
        eprintln!("  or add `api_key` to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = build_router(&config).await?;
    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(msg) = message {
        let result = router.handle_turn(TurnRequest::new(msg, &session, &user)).await;
        print_result(&result);
        return Ok(());
    }

    println!();
    println!("  Steward: interactive mode");
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Session:   {session}");
    println!("  Type 'exit' to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let request = TurnRequest::new(line, &session, &user).with_history(history.clone());
        let result = router.handle_turn(request).await;
        print_result(&result);
        println!();

        history.push(Message::user(line));
        history.push(Message::assistant(&result.response));
    }

    println!("  Goodbye!");
    Ok(())
}

