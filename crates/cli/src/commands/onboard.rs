//! `steward onboard`: first-time setup.

use steward_config::AppConfig;

use super::CliResult;

pub async fn run() -> CliResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Steward: First-Time Setup");
    println!("=========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config file exists: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("Created config file: {}", config_path.display());
    }

    let config = AppConfig::load()?;
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Memory:    {} ({})", config.memory.backend, config.memory_db_path().display());
    println!();

    if config.has_api_key() {
        println!("API key found.");
    } else {
        println!("No API key yet. Set STEWARD_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY)");
        println!("or add `api_key` to {}", config_path.display());
    }
    println!("\nNext: `steward chat`");

    Ok(())
}
