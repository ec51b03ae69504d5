//! `steward workflows`: list and import stored workflows and templates.

use std::path::Path;
use steward_memory::MemorySystem;
use steward_workflow::WorkflowLibrary;
use tracing::warn;

use super::{CliResult, load_config, open_memory};

async fn open() -> CliResult<std::sync::Arc<MemorySystem>> {
    let config = load_config()?;
    open_memory(&config, None).await
}

pub async fn list() -> CliResult {
    let memory = open().await?;
    let workflows = memory.procedural.workflows().await?;
    let templates = memory.procedural.templates().await?;

    println!("Workflows ({})", workflows.len());
    for wf in &workflows {
        println!(
            "  {:<24} {} steps, used {}x  triggers: {}",
            wf.name,
            wf.steps.len(),
            wf.times_used,
            wf.triggers.join(", ")
        );
    }
    println!("\nTemplates ({})", templates.len());
    for t in &templates {
        println!("  {:<24} {} tasks  [{}]", t.name, t.tasks.len(), t.category);
    }
    Ok(())
}

/// Parse a TOML library file.
pub fn read_library(path: &Path) -> CliResult<WorkflowLibrary> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let library: WorkflowLibrary =
        toml::from_str(&content).map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
    Ok(library)
}

pub async fn import(path: &Path) -> CliResult {
    let library = read_library(path)?;
    if library.is_empty() {
        println!("Nothing to import from {}.", path.display());
        return Ok(());
    }
    for problem in library.problems() {
        warn!(file = %path.display(), "{problem}");
    }

    let memory = open().await?;
    let summary = library.import(&memory.procedural).await?;
    println!(
        "Imported {} workflow(s) and {} template(s) from {}",
        summary.workflows,
        summary.templates,
        path.display()
    );
    Ok(())
}
