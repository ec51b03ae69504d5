//! The bounded tool-use loop.
//!
//! 1. **Send** system prompt, history and the utterance to the LLM with the
//!    static tool catalogue
//! 2. **If tool calls**: execute each in order, append the (compressed)
//!    results and loop back to 1
//! 3. **If text**: that is the answer
//!
//! Hitting the iteration cap is a terminal, reported outcome.

use crate::turn::ToolInvocation;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use steward_config::{AppConfig, RouterConfig};
use steward_core::error::ProviderError;
use steward_core::event::{DomainEvent, EventBus};
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest, ToolChoice};
use steward_core::tool::{ToolCall, ToolContext, ToolRegistry};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub compress_results: bool,
    pub compress_threshold_chars: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_router(&RouterConfig::default(), 0.7, None)
    }
}

impl LoopSettings {
    pub fn from_router(router: &RouterConfig, temperature: f32, max_tokens: Option<u32>) -> Self {
        Self {
            max_iterations: router.max_iterations,
            temperature,
            max_tokens,
            compress_results: router.compress_results,
            compress_threshold_chars: router.compress_threshold_chars,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_router(
            &config.router,
            config.default_temperature,
            Some(config.default_max_tokens),
        )
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRun {
    pub response: String,
    /// LLM round trips
    pub iterations: usize,
    /// The cap was reached while the LLM still wanted tools
    pub capped: bool,
}

pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    model: String,
    tools: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    settings: LoopSettings,
}

/// Fields kept for entities nested inside a compressed result.
const SUMMARY_KEYS: [&str; 11] = [
    "id",
    "title",
    "status",
    "priority",
    "project",
    "due_date",
    "assignee",
    "summary",
    "action_type",
    "entity",
    "at",
];

fn slim(value: &Value, depth: usize) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| slim(v, depth + 1)).collect()),
        Value::Object(map) if depth > 0 => Value::Object(
            map.iter()
                .filter(|(k, _)| SUMMARY_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<_, _>>(),
        ),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), slim(v, depth + 1))).collect()),
        other => other.clone(),
    }
}

/// Serialize a tool result for the LLM, shrinking it past `threshold`
/// characters: nested entities keep only summary fields, then the text is
/// cut.
pub fn compress_result(value: &Value, threshold: usize) -> String {
    let full = value.to_string();
    if full.chars().count() <= threshold {
        return full;
    }
    let slimmed = slim(value, 0).to_string();
    if slimmed.chars().count() <= threshold {
        return slimmed;
    }
    let cut: String = slimmed.chars().take(threshold).collect();
    format!("{cut}… (truncated)")
}

/// Execute one call, publish a `ToolExecuted` event and fold tool errors
/// into a structured `{success: false, error}` output.
pub async fn execute_call(
    tools: &ToolRegistry,
    events: &EventBus,
    call: &ToolCall,
    ctx: &ToolContext,
) -> ToolInvocation {
    let start = Instant::now();
    let result = tools.execute(call, ctx).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (success, output) = match result {
        Ok(tool_result) => (tool_result.success, tool_result.value()),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool execution failed");
            (false, json!({ "success": false, "error": e.to_string() }))
        }
    };

    events.publish(DomainEvent::ToolExecuted {
        tool_name: call.name.clone(),
        success,
        duration_ms,
        timestamp: chrono::Utc::now(),
    });

    ToolInvocation {
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        success,
        output,
    }
}

impl ToolLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventBus>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            tools,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    fn serialize(&self, value: &Value) -> String {
        if self.settings.compress_results {
            compress_result(value, self.settings.compress_threshold_chars)
        } else {
            value.to_string()
        }
    }

    /// Run the loop. Every executed tool call is pushed onto `calls` as it
    /// happens, so callers keep them even when a later LLM call fails.
    ///
    /// `first_choice` applies to the first round trip only.
    pub async fn run(
        &self,
        system_prompt: &str,
        history: &[Message],
        utterance: &str,
        ctx: &ToolContext,
        first_choice: ToolChoice,
        calls: &mut Vec<ToolInvocation>,
    ) -> Result<LoopRun, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(utterance));

        let tool_definitions = self.tools.definitions();
        let mut tool_choice = first_choice;

        for iteration in 1..=self.settings.max_iterations {
            debug!(session_id = %ctx.session_id, iteration, "Tool loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: tool_definitions.clone(),
                tool_choice,
            };
            tool_choice = ToolChoice::Auto;

            let response = self.provider.complete(request).await?;

            if !response.wants_tools() {
                return Ok(LoopRun {
                    response: response.message.content,
                    iterations: iteration,
                    capped: false,
                });
            }

            debug!(tool_count = response.message.tool_calls.len(), "Executing tool calls");
            let tool_calls = response.message.tool_calls.clone();
            messages.push(response.message);

            for tc in &tool_calls {
                let arguments: Value = serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };
                let invocation = execute_call(&self.tools, &self.events, &call, ctx).await;
                messages.push(Message::tool_result(&tc.id, self.serialize(&invocation.output)));
                calls.push(invocation);
            }
        }

        info!(
            session_id = %ctx.session_id,
            max_iterations = self.settings.max_iterations,
            "Tool loop hit its iteration cap"
        );
        Ok(LoopRun {
            response: format!(
                "I could not complete this request within {} steps. Please narrow it down or try again.",
                self.settings.max_iterations
            ),
            iterations: self.settings.max_iterations,
            capped: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response};
    use steward_memory::MemorySystem;
    use steward_tools::{InMemoryTaskStore, default_catalogue};

    fn tool_loop(provider: Arc<SequentialMockProvider>, max_iterations: usize) -> ToolLoop {
        let tools = Arc::new(default_catalogue(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(MemorySystem::in_memory()),
        ));
        ToolLoop::new(
            provider,
            "mock-model",
            tools,
            Arc::new(EventBus::default()),
            LoopSettings {
                max_iterations,
                ..LoopSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn text_answer_ends_the_loop() {
        let provider = Arc::new(SequentialMockProvider::single_text("Nothing to do."));
        let mut calls = Vec::new();
        let run = tool_loop(provider.clone(), 10)
            .run("system", &[], "hi", &ToolContext::new("u1", "s1"), ToolChoice::Auto, &mut calls)
            .await
            .unwrap();
        assert_eq!(run.response, "Nothing to do.");
        assert_eq!(run.iterations, 1);
        assert!(!run.capped);
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_round() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("create_task", json!({"title": "Call the bank"}))],
            "",
            "Created it.",
        ));
        let mut calls = Vec::new();
        let run = tool_loop(provider.clone(), 10)
            .run("system", &[], "add a task", &ToolContext::new("u1", "s1"), ToolChoice::Required, &mut calls)
            .await
            .unwrap();

        assert_eq!(run.iterations, 2);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].success);
        assert_eq!(calls[0].output["task"]["title"], "Call the bank");

        let requests = provider.requests();
        assert_eq!(requests[0].tool_choice, ToolChoice::Required);
        assert_eq!(requests[1].tool_choice, ToolChoice::Auto);
        assert!(requests[1].messages.iter().any(|m| m.content.contains("Call the bank")));
    }

    #[tokio::test]
    async fn cap_is_terminal() {
        let mut responses: Vec<_> = (0..10)
            .map(|_| make_tool_call_response(vec![make_tool_call("list_tasks", json!({}))], ""))
            .collect();
        responses.push(make_text_response("finally"));
        let provider = Arc::new(SequentialMockProvider::new(responses));

        let mut calls = Vec::new();
        let run = tool_loop(provider.clone(), 10)
            .run("system", &[], "loop", &ToolContext::new("u1", "s1"), ToolChoice::Auto, &mut calls)
            .await
            .unwrap();

        assert!(run.capped);
        assert_eq!(run.iterations, 10);
        assert_eq!(provider.call_count(), 10);
        assert_eq!(calls.len(), 10);
        assert!(run.response.contains("could not complete"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_llm() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("launch_rocket", json!({}))],
            "",
            "Sorry.",
        ));
        let mut calls = Vec::new();
        tool_loop(provider.clone(), 10)
            .run("system", &[], "go", &ToolContext::new("u1", "s1"), ToolChoice::Auto, &mut calls)
            .await
            .unwrap();
        assert!(!calls[0].success);
        assert!(calls[0].output["error"].as_str().unwrap().contains("launch_rocket"));
    }

    #[test]
    fn compression_keeps_summary_fields() {
        let tasks: Vec<Value> = (0..50)
            .map(|i| {
                json!({
                    "id": format!("task-{i}"),
                    "title": format!("Task {i}"),
                    "description": "x".repeat(200),
                    "annotations": [{"kind": "note", "text": "y".repeat(100)}],
                })
            })
            .collect();
        let value = json!({"success": true, "count": 50, "tasks": tasks});

        let small = json!({"success": true});
        assert_eq!(compress_result(&small, 100), small.to_string());

        let compressed = compress_result(&value, 4000);
        assert!(!compressed.contains("description"));
        assert!(compressed.contains("task-49"));

        let cut = compress_result(&value, 100);
        assert!(cut.ends_with("… (truncated)"));
    }
}
