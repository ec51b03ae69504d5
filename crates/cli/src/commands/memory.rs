//! `steward memory`: read-only views over the memory managers.

use steward_memory::{EpisodeFilter, MemorySystem};

use super::{CliResult, load_config, open_memory};

async fn open() -> CliResult<std::sync::Arc<MemorySystem>> {
    let config = load_config()?;
    let embedder = steward_providers::router::build_from_config(&config)
        .default()
        .and_then(|provider| steward_providers::router::build_embedder(&config, provider));
    open_memory(&config, embedder).await
}

pub async fn preferences(user: &str) -> CliResult {
    let memory = open().await?;
    let prefs = memory.semantic.list(user, 0.0, 100).await?;
    if prefs.is_empty() {
        println!("No preferences stored for {user}.");
        return Ok(());
    }
    for pref in prefs {
        println!(
            "  {:<24} {:<30} {:.2}  {:?}  used {}x",
            pref.key, pref.value, pref.confidence, pref.source, pref.times_used
        );
    }
    Ok(())
}

pub async fn rules(user: &str) -> CliResult {
    let memory = open().await?;
    let rules = memory.procedural.rules(user, 0.0).await?;
    if rules.is_empty() {
        println!("No rules learned for {user}.");
        return Ok(());
    }
    for rule in rules {
        let last = rule
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "  \"{}\" -> {}  (confidence {:.2}, used {}x, last {last})",
            rule.trigger, rule.action_type, rule.confidence, rule.times_used
        );
    }
    Ok(())
}

pub async fn history(user: &str, semantic: Option<&str>, limit: usize) -> CliResult {
    let memory = open().await?;
    let filter = EpisodeFilter {
        limit: Some(limit),
        ..EpisodeFilter::default()
    };
    let actions = match semantic {
        Some(query) => memory.episodic.search(user, query, &filter, limit).await?,
        None => memory.episodic.list(user, &filter).await?,
    };
    if actions.is_empty() {
        println!("No activity recorded for {user}.");
        return Ok(());
    }
    for action in actions {
        println!("  {}  {}", action.created_at.format("%Y-%m-%d %H:%M"), action.summary());
    }
    Ok(())
}

pub async fn handoffs() -> CliResult {
    let memory = open().await?;
    let handoffs = memory.shared.list().await?;
    if handoffs.is_empty() {
        println!("No live handoffs.");
        return Ok(());
    }
    for h in handoffs {
        println!(
            "  {}  {} -> {}  [{}]  expires {}",
            h.id,
            h.source_agent,
            h.target_agent,
            h.status.as_str(),
            h.expires_at.format("%H:%M:%S")
        );
    }
    Ok(())
}
