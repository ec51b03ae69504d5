//! Subcommand implementations and the runtime they share.

pub mod chat;
pub mod memory;
pub mod onboard;
pub mod workflows;

use chrono::Duration;
use std::sync::Arc;
use steward_config::AppConfig;
use steward_core::embedding::Embedder;
use steward_core::memory::MemoryStore;
use steward_memory::{InMemoryStore, MemorySystem, SqliteStore};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The configured memory store backend.
pub async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn MemoryStore>> {
    match config.memory.backend.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryStore::new())),
        _ => {
            let path = config.memory_db_path();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
    }
}

pub async fn open_memory(config: &AppConfig, embedder: Option<Arc<dyn Embedder>>) -> CliResult<Arc<MemorySystem>> {
    let store = open_store(config).await?;
    Ok(Arc::new(MemorySystem::new(
        store,
        embedder,
        Duration::seconds(config.memory.working_ttl_secs as i64),
        Duration::seconds(config.memory.handoff_ttl_secs as i64),
    )))
}
