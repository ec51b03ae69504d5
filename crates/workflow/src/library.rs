//! Importable workflow and template definitions.
//!
//! A library file is a serde document with repeated `workflow` and
//! `template` tables:
//!
//! ```toml
//! [[workflow]]
//! name = "bug-report"
//! triggers = ["report a bug"]
//!
//! [[workflow.steps]]
//! operation = "create_task"
//! extract = ["title", "priority"]
//! capture = "id"
//!
//! [[template]]
//! name = "client-onboarding"
//! category = "onboarding"
//! tasks = [{ title = "Kickoff call", priority = "high" }]
//! ```

use serde::{Deserialize, Serialize};
use steward_core::error::MemoryError;
use steward_memory::{ProceduralMemory, Template, Workflow};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowLibrary {
    #[serde(default, rename = "workflow")]
    pub workflows: Vec<Workflow>,
    #[serde(default, rename = "template")]
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub workflows: usize,
    pub templates: usize,
}

impl WorkflowLibrary {
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty() && self.templates.is_empty()
    }

    /// Names of workflows that have no steps or reference a step capture
    /// that no earlier step produces.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for workflow in &self.workflows {
            if workflow.steps.is_empty() {
                problems.push(format!("workflow '{}' has no steps", workflow.name));
            }
            for (i, step) in workflow.steps.iter().enumerate() {
                for reference in step.bind.values() {
                    let produced = workflow.steps[..i].iter().enumerate().any(|(j, earlier)| {
                        earlier
                            .capture
                            .as_ref()
                            .is_some_and(|key| *reference == format!("step_{}.{key}", j + 1))
                    });
                    if !produced {
                        problems.push(format!(
                            "workflow '{}' step {} binds '{reference}', which no earlier step captures",
                            workflow.name,
                            i + 1
                        ));
                    }
                }
            }
        }
        problems
    }

    /// Store every workflow and template, replacing same-named entries.
    /// Usage counters of replaced workflows are kept.
    pub async fn import(&self, procedural: &ProceduralMemory) -> Result<ImportSummary, MemoryError> {
        for workflow in &self.workflows {
            let mut workflow = workflow.clone();
            if let Some(existing) = procedural.get_workflow(&workflow.name).await? {
                workflow.times_used = workflow.times_used.max(existing.times_used);
            }
            procedural.save_workflow(&workflow).await?;
        }
        for template in &self.templates {
            procedural.save_template(template).await?;
        }
        info!(
            workflows = self.workflows.len(),
            templates = self.templates.len(),
            "Workflow library imported"
        );
        Ok(ImportSummary {
            workflows: self.workflows.len(),
            templates: self.templates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use steward_memory::InMemoryStore;

    fn library() -> WorkflowLibrary {
        serde_json::from_value(json!({
            "workflow": [{
                "name": "bug-report",
                "triggers": ["report a bug"],
                "steps": [
                    {"operation": "create_task", "extract": ["title"], "capture": "id"},
                    {"operation": "add_note", "params": {"text": "from chat"}, "bind": {"id": "step_1.id"}}
                ]
            }],
            "template": [{
                "name": "client-onboarding",
                "category": "onboarding",
                "tasks": [{"title": "Kickoff call", "priority": "high"}]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn valid_library_has_no_problems() {
        assert!(library().problems().is_empty());
    }

    #[test]
    fn dangling_binding_is_reported() {
        let mut lib = library();
        lib.workflows[0].steps[0].capture = None;
        let problems = lib.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("step_1.id"));
    }

    #[tokio::test]
    async fn import_keeps_usage_counters() {
        let procedural = ProceduralMemory::new(Arc::new(InMemoryStore::new()));
        let lib = library();
        lib.import(&procedural).await.unwrap();
        procedural.record_workflow_use("bug-report").await.unwrap();

        let summary = lib.import(&procedural).await.unwrap();
        assert_eq!(summary, ImportSummary { workflows: 1, templates: 1 });
        let stored = procedural.get_workflow("bug-report").await.unwrap().unwrap();
        assert_eq!(stored.times_used, 1);
        assert_eq!(procedural.templates().await.unwrap().len(), 1);
    }
}
