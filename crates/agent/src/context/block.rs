//! The memory context block injected into the system prompt.
//!
//! Sections appear in a fixed precedence:
//!
//! | Section | Source | Bound |
//! |---------|--------|-------|
//! | Current Context | Working memory | One session |
//! | Preferences | Semantic memory | confidence ≥ floor, top k |
//! | Rules | Procedural rules | confidence ≥ floor, top k |
//! | Saved Workflows | Procedural workflows | limit, steps previewed |
//! | Awaiting Selection | Disambiguation register | One pending set |

use std::fmt::Write;
use steward_config::MemoryConfig;
use steward_core::error::MemoryError;
use steward_memory::{DisambiguationSet, MemorySystem, Preference, Rule, SessionContext, Workflow};

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSettings {
    pub min_confidence: f32,
    pub top_k: usize,
    pub workflow_limit: usize,
    pub step_preview: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for ContextSettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            min_confidence: config.context_min_confidence,
            top_k: config.context_top_k,
            workflow_limit: config.context_workflow_limit,
            step_preview: config.workflow_step_preview,
        }
    }
}

/// Everything memory contributes to one turn's prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    pub session: Option<SessionContext>,
    pub preferences: Vec<Preference>,
    pub rules: Vec<Rule>,
    pub workflows: Vec<Workflow>,
    pub pending: Option<DisambiguationSet>,
}

impl ContextBlock {
    pub async fn load(
        memory: &MemorySystem,
        user_id: &str,
        session_id: &str,
        settings: &ContextSettings,
    ) -> Result<Self, MemoryError> {
        let session = memory.working.get(session_id).await?;
        let preferences = memory
            .semantic
            .list(user_id, settings.min_confidence, settings.top_k)
            .await?;

        let mut rules = memory.procedural.rules(user_id, settings.min_confidence).await?;
        rules.truncate(settings.top_k);

        let mut workflows = memory.procedural.workflows().await?;
        workflows.truncate(settings.workflow_limit);

        let pending = memory.disambiguation.pending(session_id).await?;

        Ok(Self {
            session,
            preferences,
            rules,
            workflows,
            pending,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.session.as_ref().is_none_or(SessionContext::is_empty)
            && self.preferences.is_empty()
            && self.rules.is_empty()
            && self.workflows.is_empty()
            && self.pending.is_none()
    }

    pub fn render(&self, step_preview: usize) -> String {
        let mut out = String::new();

        if let Some(ctx) = self.session.as_ref().filter(|c| !c.is_empty()) {
            out.push_str("## Current Context\n");
            if let Some(focus) = &ctx.current_focus {
                let _ = writeln!(out, "- Focus project: {} ({})", focus.title, focus.id);
            }
            if let Some(task) = &ctx.current_task {
                let _ = writeln!(out, "- Current task: {} ({})", task.title, task.id);
            }
            if let Some(action) = &ctx.last_action {
                let _ = writeln!(out, "- Last action: {action}");
            }
            if let Some(priority) = &ctx.priority_filter {
                let _ = writeln!(out, "- Priority filter: {priority}");
            }
            out.push('\n');
        }

        if !self.preferences.is_empty() {
            out.push_str("## Preferences\n");
            for p in &self.preferences {
                let _ = writeln!(out, "- {}: {} (confidence {:.2})", p.key, p.value, p.confidence);
            }
            out.push('\n');
        }

        if !self.rules.is_empty() {
            out.push_str("## Rules\n");
            for r in &self.rules {
                let _ = writeln!(out, "- When the user says \"{}\": {}", r.trigger, r.action_type);
            }
            out.push('\n');
        }

        if !self.workflows.is_empty() {
            out.push_str("## Saved Workflows\n");
            for w in &self.workflows {
                let _ = write!(out, "- {}", w.name);
                if !w.description.is_empty() {
                    let _ = write!(out, ": {}", w.description);
                }
                if !w.triggers.is_empty() {
                    let _ = write!(out, " (say: {})", w.triggers.join(", "));
                }
                out.push('\n');
                for (i, step) in w.steps.iter().take(step_preview).enumerate() {
                    let _ = writeln!(out, "  {}. {}", i + 1, step.operation);
                }
                if w.steps.len() > step_preview {
                    let _ = writeln!(out, "  … {} more step(s)", w.steps.len() - step_preview);
                }
            }
            out.push('\n');
        }

        if let Some(set) = &self.pending {
            let _ = writeln!(
                out,
                "## Awaiting Selection\nThe user was asked to pick one result for \"{}\":",
                set.query
            );
            for c in &set.candidates {
                match &c.group {
                    Some(group) => {
                        let _ = writeln!(out, "{}. {} [{}] ({})", c.index, c.title, group, c.id);
                    }
                    None => {
                        let _ = writeln!(out, "{}. {} ({})", c.index, c.title, c.id);
                    }
                }
            }
            out.push('\n');
        }

        out.trim_end().to_string()
    }
}
