//! Multi-step decomposition.
//!
//! The LLM is asked only to segment a compound request into ordered
//! `{intent, description}` steps. Execution is deterministic:
//!
//! - `research` asks the discovery cache and stashes the answer text
//! - `create_entity` picks a matching template, names and creates a project,
//!   and stashes its id
//! - `generate_from_template` needs both a stashed template and a stashed
//!   entity id, then creates the template's tasks under the entity
//!
//! The first failing step halts the plan. Entities created by earlier steps
//! are kept.

use crate::loop_runner::execute_call;
use crate::turn::ToolInvocation;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use steward_core::event::EventBus;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use steward_core::tool::{ToolCall, ToolContext, ToolRegistry};
use steward_discovery::{DiscoveryError, ToolDiscoveryCache, preview};
use steward_memory::{MemorySystem, Template};
use tracing::{debug, info, warn};

const SEGMENT_PROMPT: &str = "Split the user's request into the ordered steps needed to carry it out. \
Use only these intents: \"research\" (look something up externally), \"create_entity\" (create a project), \
\"generate_from_template\" (create the standard tasks for that project). \
Reply with a JSON array only, e.g. [{\"intent\": \"research\", \"description\": \"...\"}].";

const RESEARCH_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub intent: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepResult {
    /// 1-based
    pub step: usize,
    pub intent: String,
    pub description: String,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub success: bool,
    pub steps_completed: usize,
    /// Every attempted step, the failing one included
    pub results: Vec<PlanStepResult>,
    pub message: String,
    /// The failure was a retryable timeout
    #[serde(default)]
    pub timed_out: bool,
}

/// Values handed from one step to the next.
#[derive(Debug, Default)]
struct PlanContext {
    research: Option<String>,
    template: Option<Template>,
    entity_id: Option<String>,
    entity_title: Option<String>,
}

/// Why a step failed.
struct StepFailure {
    reason: String,
    timed_out: bool,
}

impl From<String> for StepFailure {
    fn from(reason: String) -> Self {
        Self {
            reason,
            timed_out: false,
        }
    }
}

impl From<&str> for StepFailure {
    fn from(reason: &str) -> Self {
        reason.to_string().into()
    }
}

/// The outermost JSON array in an LLM reply, as plan steps.
pub fn parse_plan(text: &str) -> Option<Vec<PlanStep>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let steps: Vec<PlanStep> = serde_json::from_str(&text[start..=end]).ok()?;
    let steps: Vec<PlanStep> = steps
        .into_iter()
        .map(|s| PlanStep {
            intent: s.intent.trim().to_lowercase(),
            description: s.description.trim().to_string(),
        })
        .filter(|s| !s.intent.is_empty())
        .collect();
    (!steps.is_empty()).then_some(steps)
}

static ENTITY_NAME: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"["“]([^"”]+)["”]"#,
        r"(?i)\b(?:called|named|titled)\s+(.+?)\s*[.!]*$",
        r"(?i)\b(?:project|workspace|initiative)\s+(?:for|about|on)\s+(.+?)\s*[.!]*$",
        r"(?i)\bfor\s+(.+?)\s*[.!]*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// A project name from a step description.
pub fn derive_entity_name(description: &str) -> String {
    ENTITY_NAME
        .iter()
        .find_map(|re| re.captures(description).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| description.trim().trim_end_matches(['.', '!']).chars().take(60).collect())
}

pub struct MultiStepPlanner {
    provider: Arc<dyn Provider>,
    model: String,
    tools: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    memory: Arc<MemorySystem>,
    discovery: Option<Arc<ToolDiscoveryCache>>,
}

impl MultiStepPlanner {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventBus>,
        memory: Arc<MemorySystem>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            tools,
            events,
            memory,
            discovery: None,
        }
    }

    pub fn with_discovery(mut self, discovery: Option<Arc<ToolDiscoveryCache>>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Ask the LLM to segment the request. `None` means "no multi-step
    /// detected": an LLM error or an unparseable reply.
    pub async fn segment(&self, utterance: &str) -> Option<Vec<PlanStep>> {
        let request = ProviderRequest::plain(
            self.model.clone(),
            vec![Message::system(SEGMENT_PROMPT), Message::user(utterance)],
            0.0,
        );
        match self.provider.complete(request).await {
            Ok(response) => {
                let plan = parse_plan(&response.message.content);
                if plan.is_none() {
                    debug!("Segmentation reply was not a plan");
                }
                plan
            }
            Err(e) => {
                warn!(error = %e, "Segmentation failed");
                None
            }
        }
    }

    pub async fn execute(
        &self,
        plan: &[PlanStep],
        utterance: &str,
        ctx: &ToolContext,
        calls: &mut Vec<ToolInvocation>,
    ) -> PlanReport {
        info!(session_id = %ctx.session_id, steps = plan.len(), "Executing multi-step plan");

        let mut shared = PlanContext::default();
        let mut results = Vec::with_capacity(plan.len());
        let mut failure = None;

        for (i, step) in plan.iter().enumerate() {
            let number = i + 1;
            let outcome = match step.intent.as_str() {
                "research" => self.research(step, &mut shared).await,
                "create_entity" => self.create_entity(step, utterance, ctx, &mut shared, calls).await,
                "generate_from_template" => self.generate_from_template(ctx, &shared, calls).await,
                other => Err(format!("unrecognized step type '{other}'").into()),
            };

            let (success, output) = match &outcome {
                Ok(output) => (true, output.clone()),
                Err(f) => (false, f.reason.clone()),
            };
            results.push(PlanStepResult {
                step: number,
                intent: step.intent.clone(),
                description: step.description.clone(),
                success,
                output,
            });

            if let Err(f) = outcome {
                warn!(step = number, intent = %step.intent, reason = %f.reason, "Plan step failed");
                failure = Some((number, step.intent.clone(), f));
                break;
            }
        }

        let steps_completed = results.iter().filter(|r| r.success).count();
        match failure {
            None => PlanReport {
                success: true,
                steps_completed,
                message: format!(
                    "Completed all {} steps: {}",
                    plan.len(),
                    results.iter().map(|r| r.output.as_str()).collect::<Vec<_>>().join(" | ")
                ),
                results,
                timed_out: false,
            },
            Some((number, intent, f)) => PlanReport {
                success: false,
                steps_completed,
                message: format!(
                    "Completed {steps_completed} of {} steps; step {number} ({intent}) failed: {}. \
                     Anything already created was kept.",
                    plan.len(),
                    f.reason
                ),
                results,
                timed_out: f.timed_out,
            },
        }
    }

    async fn research(&self, step: &PlanStep, shared: &mut PlanContext) -> Result<String, StepFailure> {
        let Some(discovery) = &self.discovery else {
            return Err("external research is unavailable".into());
        };
        match discovery.discover(&step.description, Some("research")).await {
            Ok(outcome) => {
                let summary = preview(&outcome.answer, RESEARCH_PREVIEW_CHARS);
                shared.research = Some(outcome.answer);
                Ok(format!("Research: {summary}"))
            }
            Err(e) => Err(StepFailure {
                timed_out: matches!(e, DiscoveryError::Timeout { .. }),
                reason: e.to_string(),
            }),
        }
    }

    async fn create_entity(
        &self,
        step: &PlanStep,
        utterance: &str,
        ctx: &ToolContext,
        shared: &mut PlanContext,
        calls: &mut Vec<ToolInvocation>,
    ) -> Result<String, StepFailure> {
        let template = match self.memory.procedural.find_template(&step.description).await {
            Ok(Some(t)) => Some(t),
            Ok(None) => self.memory.procedural.find_template(utterance).await.ok().flatten(),
            Err(e) => {
                warn!(error = %e, "Template lookup failed");
                None
            }
        };
        if let Some(t) = &template {
            debug!(template = %t.name, "Template selected");
        }
        shared.template = template;

        let title = derive_entity_name(&step.description);
        let mut arguments = json!({ "title": title });
        if let Some(research) = &shared.research {
            arguments["description"] = Value::String(preview(research, RESEARCH_PREVIEW_CHARS));
        }

        let call = ToolCall {
            id: format!("plan-create-{}", calls.len() + 1),
            name: "create_project".into(),
            arguments,
        };
        let invocation = execute_call(&self.tools, &self.events, &call, ctx).await;
        let created = invocation
            .output
            .get("project")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .map(String::from);
        let failure = invocation.output.get("error").and_then(Value::as_str).map(String::from);
        let success = invocation.success;
        calls.push(invocation);

        match (success, created) {
            (true, Some(id)) => {
                let text = format!("Created project '{title}' ({id})");
                shared.entity_id = Some(id);
                shared.entity_title = Some(title);
                Ok(text)
            }
            _ => Err(failure.unwrap_or_else(|| "project creation failed".into()).into()),
        }
    }

    async fn generate_from_template(
        &self,
        ctx: &ToolContext,
        shared: &PlanContext,
        calls: &mut Vec<ToolInvocation>,
    ) -> Result<String, StepFailure> {
        let Some(template) = &shared.template else {
            return Err("no template was selected by an earlier step".into());
        };
        let Some(entity_id) = &shared.entity_id else {
            return Err("no entity was created by an earlier step".into());
        };

        for (i, task) in template.tasks.iter().enumerate() {
            let mut arguments = json!({ "title": task.title, "project_id": entity_id });
            if let Some(priority) = &task.priority {
                arguments["priority"] = Value::String(priority.clone());
            }
            if let Some(description) = &task.description {
                arguments["description"] = Value::String(description.clone());
            }
            let call = ToolCall {
                id: format!("plan-task-{}", i + 1),
                name: "create_task".into(),
                arguments,
            };
            let invocation = execute_call(&self.tools, &self.events, &call, ctx).await;
            let success = invocation.success;
            let error = invocation.output.get("error").and_then(Value::as_str).map(String::from);
            calls.push(invocation);
            if !success {
                return Err(format!(
                    "task '{}' could not be created: {}",
                    task.title,
                    error.unwrap_or_else(|| "unknown error".into())
                )
                .into());
            }
        }

        let project = shared.entity_title.as_deref().unwrap_or(entity_id);
        Ok(format!(
            "Created {} task(s) from template '{}' in '{project}'",
            template.tasks.len(),
            template.name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use steward_memory::TemplateTask;
    use steward_tools::{InMemoryTaskStore, default_catalogue};

    fn planner(memory: Arc<MemorySystem>) -> MultiStepPlanner {
        let tools = Arc::new(default_catalogue(Arc::new(InMemoryTaskStore::new()), memory.clone()));
        MultiStepPlanner::new(
            Arc::new(SequentialMockProvider::new(vec![])),
            "mock-model",
            tools,
            Arc::new(EventBus::default()),
            memory,
        )
    }

    fn step(intent: &str, description: &str) -> PlanStep {
        PlanStep {
            intent: intent.into(),
            description: description.into(),
        }
    }

    async fn with_onboarding_template() -> Arc<MemorySystem> {
        let memory = Arc::new(MemorySystem::in_memory());
        memory
            .procedural
            .save_template(&Template {
                name: "client-onboarding".into(),
                category: "onboarding".into(),
                keywords: vec!["client".into(), "crm".into()],
                tasks: vec![
                    TemplateTask {
                        title: "Kickoff call".into(),
                        priority: Some("high".into()),
                        description: None,
                    },
                    TemplateTask {
                        title: "Send welcome pack".into(),
                        priority: None,
                        description: Some("Docs and logins".into()),
                    },
                ],
            })
            .await
            .unwrap();
        memory
    }

    #[test]
    fn parses_fenced_plans() {
        let reply = "Here you go:\n```json\n[{\"intent\": \"Research\", \"description\": \"CRM tips\"}, {\"intent\": \"create_entity\", \"description\": \"Create a project for Acme\"}]\n```";
        let plan = parse_plan(reply).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].intent, "research");
        assert!(parse_plan("no plan here").is_none());
        assert!(parse_plan("[]").is_none());
    }

    #[test]
    fn entity_names() {
        assert_eq!(derive_entity_name("Create a project for Acme onboarding."), "Acme onboarding");
        assert_eq!(derive_entity_name("Set up \"Helios\" workspace"), "Helios");
        assert_eq!(derive_entity_name("make a project called Orion"), "Orion");
        assert_eq!(derive_entity_name("Kickoff"), "Kickoff");
    }

    #[tokio::test]
    async fn create_then_generate() {
        let memory = with_onboarding_template().await;
        let mut calls = Vec::new();
        let report = planner(memory)
            .execute(
                &[
                    step("create_entity", "Create a client onboarding project for Acme"),
                    step("generate_from_template", "Add the onboarding tasks"),
                ],
                "onboard Acme",
                &ToolContext::new("u1", "s1"),
                &mut calls,
            )
            .await;

        assert!(report.success, "{}", report.message);
        assert_eq!(report.steps_completed, 2);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].arguments["project_id"], calls[0].output["project"]["id"]);
        assert_eq!(calls[1].arguments["priority"], "high");
    }

    #[tokio::test]
    async fn generate_without_template_fails() {
        let memory = Arc::new(MemorySystem::in_memory());
        let mut calls = Vec::new();
        let report = planner(memory)
            .execute(
                &[
                    step("create_entity", "Create a project for Acme"),
                    step("generate_from_template", "Add the standard tasks"),
                    step("create_entity", "Create a project for Beta"),
                ],
                "set up Acme",
                &ToolContext::new("u1", "s1"),
                &mut calls,
            )
            .await;

        assert!(!report.success);
        assert_eq!(report.steps_completed, 1);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[1].output.contains("no template"));
        assert!(report.message.contains("step 2"));
        // The third step never ran
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn research_without_discovery_and_unknown_steps_fail() {
        let memory = Arc::new(MemorySystem::in_memory());
        let mut calls = Vec::new();
        let p = planner(memory);

        let report = p
            .execute(&[step("research", "CRM tips")], "", &ToolContext::default(), &mut calls)
            .await;
        assert!(!report.success);
        assert_eq!(report.steps_completed, 0);

        let report = p
            .execute(&[step("dance", "")], "", &ToolContext::default(), &mut calls)
            .await;
        assert!(report.results[0].output.contains("unrecognized step type"));
    }
}
