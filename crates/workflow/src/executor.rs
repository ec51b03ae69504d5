//! Workflow executor.
//!
//! Runs a stored workflow's steps in order against a `ToolRegistry`.
//! Each step's parameters are layered: static params, then fields
//! extracted from the user's text, then bindings to values captured by
//! earlier steps. Execution halts at the first failing step; completed
//! side effects are not rolled back.

use crate::extract::extract;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use steward_core::tool::{ToolCall, ToolContext, ToolRegistry};
use steward_memory::{Workflow, WorkflowStep};
use tracing::{debug, info, warn};

/// The outcome of one attempted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based
    pub step: usize,
    pub operation: String,
    pub params: Value,
    pub success: bool,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow: String,
    pub success: bool,
    pub steps_completed: usize,
    /// Every attempted step, the failing one included
    pub results: Vec<StepResult>,
    /// `step_N.key` → captured value
    pub captures: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        let total = self.results.len().max(self.steps_completed);
        match &self.error {
            None => format!("Workflow '{}' completed {} step(s).", self.workflow, self.steps_completed),
            Some(err) => format!(
                "Workflow '{}' stopped after {} of {} attempted step(s): {}",
                self.workflow, self.steps_completed, total, err
            ),
        }
    }
}

/// Pick a captured value out of a step result: the exact key (top level or
/// inside a nested entity object), then `id` when the key names an id, then
/// the whole result.
pub fn capture_value(result: &Value, key: &str) -> Value {
    let nested = result
        .as_object()
        .into_iter()
        .flat_map(|m| m.values())
        .filter(|v| v.is_object());

    if let Some(v) = result.get(key).filter(|v| !v.is_null()) {
        return v.clone();
    }
    if let Some(v) = nested.clone().find_map(|obj| obj.get(key).filter(|v| !v.is_null())) {
        return v.clone();
    }
    if key == "id" || key.ends_with("_id") || key.ends_with("Id") {
        if let Some(v) = result.get("id").filter(|v| !v.is_null()) {
            return v.clone();
        }
        if let Some(v) = nested.clone().find_map(|obj| obj.get("id").filter(|v| !v.is_null())) {
            return v.clone();
        }
    }
    result.clone()
}

pub struct WorkflowExecutor {
    tools: Arc<ToolRegistry>,
}

impl WorkflowExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Layer static params, extracted fields and bound captures.
    /// A binding to a capture that was never produced omits the parameter.
    pub fn build_params(
        step: &WorkflowStep,
        user_text: &str,
        captures: &BTreeMap<String, Value>,
        today: NaiveDate,
    ) -> Map<String, Value> {
        let mut params = step.params.clone();

        for field in &step.extract {
            if let Some(value) = extract(*field, user_text, today) {
                params.insert(field.param_name().to_string(), Value::String(value));
            }
        }

        for (param, reference) in &step.bind {
            match captures.get(reference) {
                Some(value) => {
                    params.insert(param.clone(), value.clone());
                }
                None => {
                    debug!(param = %param, reference = %reference, "Unresolved binding; omitting parameter");
                    params.remove(param);
                }
            }
        }

        params
    }

    pub async fn run(&self, workflow: &Workflow, user_text: &str, ctx: &ToolContext) -> WorkflowRun {
        self.run_on(workflow, user_text, ctx, Utc::now().date_naive()).await
    }

    /// `run` with an explicit "today" for date extraction.
    pub async fn run_on(
        &self,
        workflow: &Workflow,
        user_text: &str,
        ctx: &ToolContext,
        today: NaiveDate,
    ) -> WorkflowRun {
        info!(workflow = %workflow.name, steps = workflow.steps.len(), "Running workflow");

        let mut run = WorkflowRun {
            workflow: workflow.name.clone(),
            success: true,
            steps_completed: 0,
            results: Vec::with_capacity(workflow.steps.len()),
            captures: BTreeMap::new(),
            error: None,
        };

        for (i, step) in workflow.steps.iter().enumerate() {
            let number = i + 1;
            let params = Value::Object(Self::build_params(step, user_text, &run.captures, today));
            let call = ToolCall {
                id: format!("{}-step-{number}", workflow.name),
                name: step.operation.clone(),
                arguments: params.clone(),
            };

            let (success, output, error) = if self.tools.contains(&step.operation) {
                match self.tools.execute(&call, ctx).await {
                    Ok(result) if result.success => (true, result.value(), None),
                    Ok(result) => {
                        let value = result.value();
                        let reason = value
                            .get("error")
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| result.output.clone());
                        (false, value, Some(reason))
                    }
                    Err(e) => (false, Value::Null, Some(e.to_string())),
                }
            } else {
                let reason = format!("Unknown operation '{}'", step.operation);
                (false, Value::Null, Some(reason))
            };

            run.results.push(StepResult {
                step: number,
                operation: step.operation.clone(),
                params,
                success,
                output: output.clone(),
            });

            if let Some(reason) = error {
                warn!(workflow = %workflow.name, step = number, operation = %step.operation, %reason, "Workflow step failed");
                run.success = false;
                run.error = Some(format!("step {number} ({}) failed: {reason}", step.operation));
                break;
            }

            run.steps_completed += 1;
            if let Some(key) = &step.capture {
                run.captures
                    .insert(format!("step_{number}.{key}"), capture_value(&output, key));
            }
        }

        info!(
            workflow = %workflow.name,
            success = run.success,
            completed = run.steps_completed,
            "Workflow finished"
        );
        run
    }
}
