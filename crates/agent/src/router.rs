//! The request router.
//!
//! Tiers are tried in strict priority and the first to claim the turn
//! answers it:
//!
//! | Stage | Claims when | Runs |
//! |-------|-------------|------|
//! | Selection | A disambiguation set is pending and the utterance is positional | Register resolve |
//! | A. Rule | A learned trigger occurs in the utterance | Tool loop with a directive |
//! | B. Workflow | A stored workflow matches | Workflow executor |
//! | C. Multi-step | Connective plus research-and-create pairing | Segment, then plan steps |
//! | D. Tool loop | Intent is servable by the static catalogue | Bounded tool loop |
//! | E. Discovery | Intent needs an external capability | Discovery cache |
//!
//! Memory side effects run after every turn, whichever tier answered and
//! whether or not it succeeded. All per-turn state lives in a `TurnState`
//! threaded through the call; the router itself is shared and immutable.

use crate::context::{ContextBlock, ContextSettings};
use crate::loop_runner::{LoopSettings, ToolLoop};
use crate::multi_step::MultiStepPlanner;
use crate::patterns::{Matcher, SelectionPattern, Signal, classify_intent, detect_signals, looks_multi_step};
use crate::turn::{SideEffects, Tier, ToolInvocation, TurnOutcome, TurnRequest, TurnResult};
use serde_json::{Value, json};
use std::sync::Arc;
use steward_config::{AppConfig, RouterConfig};
use steward_core::error::{MemoryError, ProviderError};
use steward_core::event::{DomainEvent, EventBus};
use steward_core::memory::Collection;
use steward_core::provider::{Provider, ToolChoice};
use steward_core::task::{EntityKind, TaskStore};
use steward_core::tool::{ToolContext, ToolRegistry};
use steward_discovery::{DiscoveryError, ToolDiscoveryCache};
use steward_memory::{
    ActionRecord, DisambiguationError, EntityRef, MemorySystem, PreferenceSource, WorkingUpdate,
};
use steward_workflow::WorkflowExecutor;
use tracing::{debug, error, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Steward, a task assistant. \
Use the tools to read and change tasks, projects, notes and activity history. \
Prefer acting over asking; when several items match, list them numbered so the user can pick one.";

/// Confidence of a focus statement stored as a preference.
const FOCUS_CONFIDENCE: f32 = 0.9;
const STATEMENT_CONFIDENCE: f32 = 0.8;
const PRIORITY_CONFIDENCE: f32 = 0.6;
const RULE_CONFIDENCE: f32 = 0.8;

/// Per-turn mutable state.
#[derive(Debug, Default)]
struct TurnState {
    calls: Vec<ToolInvocation>,
    /// Working-memory writes decided while routing
    working: Vec<WorkingUpdate>,
}

/// What the claiming tier produced.
#[derive(Debug)]
struct Routed {
    response: String,
    tier: Option<Tier>,
    outcome: TurnOutcome,
    iterations: usize,
}

impl Routed {
    fn answered(tier: Tier, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            tier: Some(tier),
            outcome: TurnOutcome::Answered,
            iterations: 0,
        }
    }

    fn with_outcome(mut self, outcome: TurnOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    fn failed(tier: Option<Tier>, error: impl std::fmt::Display) -> Self {
        Self {
            response: format!("Sorry, something went wrong: {error}"),
            tier,
            outcome: TurnOutcome::Error,
            iterations: 0,
        }
    }
}

fn is_state_changing(tool: &str) -> bool {
    ["create_", "update_", "complete_", "start_", "stop_", "add_"]
        .iter()
        .any(|p| tool.starts_with(p))
}

fn is_search(tool: &str) -> bool {
    tool.starts_with("search_")
}

fn entity_kind_of(tool: &str) -> EntityKind {
    if tool.ends_with("_project") || tool.ends_with("_projects") {
        EntityKind::Project
    } else {
        EntityKind::Task
    }
}

/// The entity object inside a tool output (`task` or `project`).
fn entity_of(output: &Value) -> Option<&Value> {
    output.get("task").or_else(|| output.get("project")).filter(|v| v.is_object())
}

fn entity_ref(entity: &Value) -> Option<EntityRef> {
    let id = entity.get("id")?.as_str()?;
    let title = entity.get("title").and_then(Value::as_str).unwrap_or(id);
    Some(EntityRef::new(id, title))
}

/// Working-memory writes implied by the tool calls of a turn.
fn inferred_updates(calls: &[ToolInvocation]) -> Vec<WorkingUpdate> {
    let mut updates = Vec::new();
    for call in calls.iter().filter(|c| c.success) {
        let reference = entity_of(&call.output).and_then(entity_ref);
        match (call.name.as_str(), reference) {
            ("get_task" | "start_task" | "create_task", Some(r)) => updates.push(WorkingUpdate::Task(r)),
            ("get_project" | "create_project", Some(r)) => updates.push(WorkingUpdate::Focus(r)),
            _ => {}
        }
        if is_state_changing(&call.name) {
            let subject = entity_of(&call.output)
                .and_then(|e| e.get("title"))
                .and_then(Value::as_str)
                .or_else(|| call.arguments.get("title").and_then(Value::as_str));
            updates.push(WorkingUpdate::LastAction(match subject {
                Some(title) => format!("{} {title}", call.name),
                None => call.name.clone(),
            }));
        }
    }
    updates
}

fn field_name(update: &WorkingUpdate) -> Option<&'static str> {
    match update {
        WorkingUpdate::Focus(_) => Some("focus"),
        WorkingUpdate::Task(_) => Some("task"),
        WorkingUpdate::LastAction(_) => Some("last_action"),
        WorkingUpdate::PriorityFilter(_) => Some("priority_filter"),
        WorkingUpdate::Clear(_) => None,
    }
}

pub struct Router {
    provider: Arc<dyn Provider>,
    model: String,
    tools: Arc<ToolRegistry>,
    task_store: Arc<dyn TaskStore>,
    memory: Arc<MemorySystem>,
    executor: WorkflowExecutor,
    discovery: Option<Arc<ToolDiscoveryCache>>,
    events: Arc<EventBus>,
    settings: RouterConfig,
    loop_settings: LoopSettings,
    context: ContextSettings,
    system_prompt: String,
}

impl Router {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        task_store: Arc<dyn TaskStore>,
        memory: Arc<MemorySystem>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            executor: WorkflowExecutor::new(tools.clone()),
            tools,
            task_store,
            memory,
            discovery: None,
            events: Arc::new(EventBus::default()),
            settings: RouterConfig::default(),
            loop_settings: LoopSettings::default(),
            context: ContextSettings::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Routing, loop and context-block settings from the app config.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.settings = config.router.clone();
        self.loop_settings = LoopSettings::from_config(config);
        self.context = ContextSettings::from(&config.memory);
        self
    }

    pub fn with_settings(mut self, settings: RouterConfig) -> Self {
        self.loop_settings.max_iterations = settings.max_iterations;
        self.loop_settings.compress_results = settings.compress_results;
        self.loop_settings.compress_threshold_chars = settings.compress_threshold_chars;
        self.settings = settings;
        self
    }

    pub fn with_discovery(mut self, discovery: Option<Arc<ToolDiscoveryCache>>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    /// Route one turn and persist its side effects. Never fails: anything
    /// unexpected becomes a textual answer with outcome `Error`.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnResult {
        info!(
            session_id = %request.session_id,
            user_id = %request.user_id,
            "Handling turn"
        );
        let ctx = ToolContext::new(&request.user_id, &request.session_id);
        let mut state = TurnState::default();

        let routed = self.route(&request, &ctx, &mut state).await;

        if let Some(tier) = routed.tier {
            self.events.publish(DomainEvent::TierSelected {
                session_id: request.session_id.clone(),
                tier: tier.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        let side_effects = self.apply_side_effects(&request, &mut state).await;

        info!(
            session_id = %request.session_id,
            tier = ?routed.tier,
            outcome = ?routed.outcome,
            tool_calls = state.calls.len(),
            "Turn complete"
        );

        TurnResult {
            response: routed.response,
            tier: routed.tier,
            outcome: routed.outcome,
            side_effects,
            tool_calls: state.calls,
            iterations: routed.iterations,
        }
    }

    /// Memory failures inside a tier lookup leave that tier unclaimed so
    /// routing can still reach the tool loop.
    async fn route(&self, request: &TurnRequest, ctx: &ToolContext, state: &mut TurnState) -> Routed {
        let utterance = request.utterance.as_str();

        if let Some(routed) = self.try_selection(request, state).await {
            return routed;
        }

        // Tier A
        let rule = self
            .memory
            .procedural
            .match_rule(&request.user_id, utterance, self.settings.rule_min_confidence)
            .await
            .unwrap_or_else(|e| {
                self.tier_lookup_failed("rule", &e);
                None
            });
        if let Some(rule) = rule {
            info!(trigger = %rule.trigger, action = %rule.action_type, "Rule tier claimed turn");
            if let Err(e) = self.memory.procedural.mark_rule_used(&request.user_id, &rule.trigger).await {
                warn!(trigger = %rule.trigger, error = %e, "Could not record rule use");
            }
            let instruction = rule
                .params
                .get("instruction")
                .and_then(Value::as_str)
                .unwrap_or(rule.action_type.as_str());
            let directive = format!(
                "## Directive\nThe user's phrase \"{}\" is a learned rule. Carry out `{}` now ({instruction}) \
                 using the tools; use the current context to pick the target.",
                rule.trigger, rule.action_type
            );
            return self
                .tool_loop(request, ctx, Some(directive), ToolChoice::Required, Tier::Rule, state)
                .await;
        }

        // Tier B
        let found = self
            .memory
            .procedural
            .find_workflow(utterance, self.settings.workflow_similarity)
            .await
            .unwrap_or_else(|e| {
                self.tier_lookup_failed("workflow", &e);
                None
            });
        if let Some(found) = found {
            info!(workflow = %found.workflow.name, similarity = ?found.similarity, "Workflow tier claimed turn");
            let run = self.executor.run(&found.workflow, utterance, ctx).await;
            for step in &run.results {
                state.calls.push(ToolInvocation {
                    name: step.operation.clone(),
                    arguments: step.params.clone(),
                    success: step.success,
                    output: step.output.clone(),
                });
            }
            if let Err(e) = self.memory.procedural.record_workflow_use(&found.workflow.name).await {
                warn!(workflow = %found.workflow.name, error = %e, "Could not record workflow use");
            }
            let outcome = if run.success {
                TurnOutcome::Answered
            } else {
                TurnOutcome::PartialFailure
            };
            return Routed::answered(Tier::Workflow, run.summary()).with_outcome(outcome);
        }

        // Tier C
        if self.settings.multi_step_enabled && looks_multi_step(utterance) {
            let planner = MultiStepPlanner::new(
                self.provider.clone(),
                self.model.clone(),
                self.tools.clone(),
                self.events.clone(),
                self.memory.clone(),
            )
            .with_discovery(self.discovery.clone());

            match planner.segment(utterance).await {
                Some(plan) => {
                    info!(steps = plan.len(), "Multi-step tier claimed turn");
                    let report = planner.execute(&plan, utterance, ctx, &mut state.calls).await;
                    let outcome = match (report.success, report.timed_out) {
                        (true, _) => TurnOutcome::Answered,
                        (false, true) => TurnOutcome::TimedOut,
                        (false, false) => TurnOutcome::PartialFailure,
                    };
                    return Routed::answered(Tier::MultiStep, report.message).with_outcome(outcome);
                }
                None => debug!("No multi-step plan; continuing"),
            }
        }

        let intent = classify_intent(utterance);
        debug!(intent = %intent, "Intent classified");

        if intent.servable_by_catalogue() {
            return self
                .tool_loop(request, ctx, None, ToolChoice::Auto, Tier::ToolLoop, state)
                .await;
        }

        // Tier E
        let Some(discovery) = &self.discovery else {
            info!(intent = %intent, "No discovery configured for external request");
            return Routed {
                response: "I can't reach an external service that could answer that. \
                           Enable tool discovery to let me look it up."
                    .into(),
                tier: Some(Tier::Discovery),
                outcome: TurnOutcome::CapabilityUnavailable,
                iterations: 0,
            };
        };

        match discovery.discover(utterance, Some(intent.as_str())).await {
            Ok(outcome) => {
                info!(provenance = ?outcome.provenance, "Discovery tier answered");
                Routed::answered(Tier::Discovery, outcome.answer)
            }
            Err(DiscoveryError::NoSuitableCapability { reason }) => {
                Routed::answered(Tier::Discovery, format!("I couldn't find a capability for that: {reason}"))
                    .with_outcome(TurnOutcome::NoSuitableCapability)
            }
            Err(e @ DiscoveryError::Timeout { .. }) => {
                Routed::answered(Tier::Discovery, format!("{e}. Please try again."))
                    .with_outcome(TurnOutcome::TimedOut)
            }
            Err(e) => Routed::failed(Some(Tier::Discovery), e),
        }
    }

    fn tier_lookup_failed(&self, tier: &str, e: &MemoryError) {
        warn!(tier, error = %e, "Tier lookup failed; skipping tier");
        self.events.publish(DomainEvent::ErrorOccurred {
            context: format!("router.{tier}"),
            error_message: e.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Resolve a positional reply against the pending disambiguation set.
    async fn try_selection(&self, request: &TurnRequest, state: &mut TurnState) -> Option<Routed> {
        let pending = match self.memory.disambiguation.pending(&request.session_id).await {
            Ok(pending) => pending?,
            Err(e) => {
                self.tier_lookup_failed("selection", &e);
                return None;
            }
        };
        let matcher = SelectionPattern {
            candidates: pending.candidates.len(),
        };
        let Signal::Selection { index } = matcher.detect(&request.utterance)? else {
            return None;
        };

        match self.memory.disambiguation.resolve(&request.session_id, index).await {
            Ok(candidate) => {
                info!(index, id = %candidate.id, "Selection resolved");
                let reference = EntityRef::new(&candidate.id, &candidate.title);
                let is_task = self.task_store.get(EntityKind::Task, &candidate.id).await.is_ok();
                state.working.push(if is_task {
                    WorkingUpdate::Task(reference)
                } else {
                    WorkingUpdate::Focus(reference)
                });
                let response = match &candidate.group {
                    Some(group) => format!("Got it: {} ({group}).", candidate.title),
                    None => format!("Got it: {}.", candidate.title),
                };
                Some(Routed::answered(Tier::Selection, response))
            }
            Err(DisambiguationError::OutOfRange { index, max }) => Some(Routed::answered(
                Tier::Selection,
                format!("There is no option {index}; please choose a number from 1 to {max}."),
            )),
            Err(DisambiguationError::NothingPending) => None,
            Err(DisambiguationError::Memory(e)) => {
                self.tier_lookup_failed("selection", &e);
                None
            }
        }
    }

    async fn system_prompt(&self, request: &TurnRequest, directive: Option<String>) -> String {
        let mut prompt = self.system_prompt.clone();
        match ContextBlock::load(&self.memory, &request.user_id, &request.session_id, &self.context).await {
            Ok(block) if !block.is_empty() => {
                prompt.push_str("\n\n");
                prompt.push_str(&block.render(self.context.step_preview));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Context block unavailable; continuing without it"),
        }
        if let Some(directive) = directive {
            prompt.push_str("\n\n");
            prompt.push_str(&directive);
        }
        prompt
    }

    async fn tool_loop(
        &self,
        request: &TurnRequest,
        ctx: &ToolContext,
        directive: Option<String>,
        first_choice: ToolChoice,
        tier: Tier,
        state: &mut TurnState,
    ) -> Routed {
        let prompt = self.system_prompt(request, directive).await;
        let runner = ToolLoop::new(
            self.provider.clone(),
            self.model.clone(),
            self.tools.clone(),
            self.events.clone(),
            self.loop_settings.clone(),
        );

        match runner
            .run(&prompt, &request.history, &request.utterance, ctx, first_choice, &mut state.calls)
            .await
        {
            Ok(run) => Routed {
                response: run.response,
                tier: Some(tier),
                outcome: if run.capped {
                    TurnOutcome::CapacityExceeded
                } else {
                    TurnOutcome::Answered
                },
                iterations: run.iterations,
            },
            Err(ProviderError::Timeout(detail)) => {
                warn!(%detail, "LLM call timed out");
                Routed::answered(tier, "The language model took too long to respond. Please try again.")
                    .with_outcome(TurnOutcome::TimedOut)
            }
            Err(e) => {
                error!(tier = %tier, error = %e, "Tool loop failed");
                self.events.publish(DomainEvent::ErrorOccurred {
                    context: tier.as_str().to_string(),
                    error_message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Routed::failed(Some(tier), e)
            }
        }
    }

    // ── Side effects ─────────────────────────────────────────────────────

    fn written(&self, collection: Collection, key: impl Into<String>) {
        self.events.publish(DomainEvent::memory_written(collection.as_str(), key));
    }

    async fn apply_side_effects(&self, request: &TurnRequest, state: &mut TurnState) -> SideEffects {
        let mut effects = SideEffects::default();
        let user = request.user_id.as_str();
        let session = request.session_id.as_str();
        let signals = detect_signals(&request.utterance);

        // Cleared first so this turn's own writes survive
        if signals.contains(&Signal::ContextSwitch) {
            match self.memory.working.clear_task_fields(session, user).await {
                Ok(_) => {
                    effects.context_cleared = true;
                    self.written(Collection::Working, format!("session:{session}"));
                }
                Err(e) => {
                    warn!(error = %e, "Could not clear task fields");
                    effects.errors.push(e.to_string());
                }
            }
        }

        let mut updates = std::mem::take(&mut state.working);
        updates.extend(inferred_updates(&state.calls));
        for signal in &signals {
            match signal {
                Signal::Focus { project } => updates.push(WorkingUpdate::Focus(self.resolve_project(project).await)),
                Signal::Priority { level } => updates.push(WorkingUpdate::PriorityFilter(level.clone())),
                _ => {}
            }
        }
        if !updates.is_empty() {
            let mut fields: Vec<String> = Vec::new();
            for name in updates.iter().filter_map(field_name) {
                if !fields.iter().any(|f| f == name) {
                    fields.push(name.to_string());
                }
            }
            match self.memory.working.apply(session, user, updates).await {
                Ok(_) => {
                    debug!(session_id = session, fields = ?fields, "Working memory written");
                    effects.working_fields = fields;
                    self.written(Collection::Working, format!("session:{session}"));
                }
                Err(e) => {
                    warn!(error = %e, "Working memory write failed");
                    effects.errors.push(e.to_string());
                }
            }
        }

        self.record_preference(user, &signals, &mut effects).await;
        self.record_rule(user, &signals, &mut effects).await;
        self.record_actions(request, &state.calls, &mut effects).await;
        self.offer_disambiguation(session, &state.calls, &mut effects).await;

        effects
    }

    /// A focus statement names a project; use the stored one when a search
    /// finds it.
    async fn resolve_project(&self, name: &str) -> EntityRef {
        match self.task_store.search(EntityKind::Project, name, 5).await {
            Ok(hits) => hits
                .iter()
                .find(|p| p.title.eq_ignore_ascii_case(name))
                .or_else(|| (hits.len() == 1).then(|| &hits[0]))
                .map(|p| EntityRef::new(&p.id, &p.title))
                .unwrap_or_else(|| EntityRef::new(name, name)),
            Err(e) => {
                debug!(error = %e, "Project lookup failed");
                EntityRef::new(name, name)
            }
        }
    }

    /// At most one preference per turn: focus, then a stated preference,
    /// then a priority filter.
    async fn record_preference(&self, user: &str, signals: &[Signal], effects: &mut SideEffects) {
        let focus = signals.iter().find_map(|s| match s {
            Signal::Focus { project } => {
                Some(("current_focus".to_string(), project.clone(), PreferenceSource::Explicit, FOCUS_CONFIDENCE))
            }
            _ => None,
        });
        let statement = || {
            signals.iter().find_map(|s| match s {
                Signal::PreferenceStatement { key, value } => {
                    Some((key.clone(), value.clone(), PreferenceSource::Explicit, STATEMENT_CONFIDENCE))
                }
                _ => None,
            })
        };
        let priority = || {
            signals.iter().find_map(|s| match s {
                Signal::Priority { level } => Some((
                    "priority_filter".to_string(),
                    level.clone(),
                    PreferenceSource::Inferred,
                    PRIORITY_CONFIDENCE,
                )),
                _ => None,
            })
        };

        let Some((key, value, source, confidence)) = focus.or_else(statement).or_else(priority) else {
            return;
        };
        match self.memory.semantic.upsert(user, &key, &value, source, confidence).await {
            Ok(pref) => {
                info!(user_id = user, key = %pref.key, confidence = pref.confidence, "Preference recorded");
                self.written(Collection::Semantic, format!("{user}:{key}"));
                effects.preference = Some(key);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Preference write failed");
                effects.errors.push(e.to_string());
            }
        }
    }

    async fn record_rule(&self, user: &str, signals: &[Signal], effects: &mut SideEffects) {
        let Some((trigger, action_type, params)) = signals.iter().find_map(|s| match s {
            Signal::RuleDeclaration {
                trigger,
                action_type,
                params,
            } => Some((trigger, action_type, params)),
            _ => None,
        }) else {
            return;
        };
        match self
            .memory
            .procedural
            .record_rule(user, trigger, action_type, params.clone(), RULE_CONFIDENCE)
            .await
        {
            Ok(rule) => {
                self.written(Collection::Procedural, format!("rule:{user}:{}", rule.trigger));
                effects.rule = Some(rule.trigger);
            }
            Err(e) => {
                warn!(trigger = %trigger, error = %e, "Rule write failed");
                effects.errors.push(e.to_string());
            }
        }
    }

    /// Action records for state-changing calls and multi-result searches.
    async fn record_actions(&self, request: &TurnRequest, calls: &[ToolInvocation], effects: &mut SideEffects) {
        for call in calls.iter().filter(|c| c.success) {
            let kind = entity_kind_of(&call.name);
            let action = if is_state_changing(&call.name) {
                let entity = entity_of(&call.output);
                let title = entity
                    .and_then(|e| e.get("title"))
                    .and_then(Value::as_str)
                    .or_else(|| call.arguments.get("title").and_then(Value::as_str))
                    .unwrap_or(call.name.as_str());
                let mut action = ActionRecord::new(
                    &request.user_id,
                    &request.session_id,
                    &call.name,
                    kind.as_str(),
                    title,
                )
                .with_metadata(call.arguments.clone());
                if let Some(id) = entity.and_then(|e| e.get("id")).and_then(Value::as_str) {
                    action = action.with_entity_id(id);
                }
                if let Some(project) = entity.and_then(|e| e.get("project")).and_then(Value::as_str) {
                    action = action.with_project(project);
                }
                action
            } else if is_search(&call.name) && call.output.get("count").and_then(Value::as_u64).unwrap_or(0) > 1 {
                let query = call.output.get("query").and_then(Value::as_str).unwrap_or_default();
                ActionRecord::new(&request.user_id, &request.session_id, &call.name, kind.as_str(), query)
                    .with_metadata(json!({ "count": call.output["count"] }))
            } else {
                continue;
            };

            match self.memory.episodic.record(action).await {
                Ok(recorded) => {
                    effects.actions += 1;
                    self.written(Collection::Episodic, format!("{}:{}", recorded.user_id, recorded.id));
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Action record failed");
                    effects.errors.push(e.to_string());
                }
            }
        }
    }

    /// The last multi-result search of the turn becomes the pending set.
    async fn offer_disambiguation(&self, session: &str, calls: &[ToolInvocation], effects: &mut SideEffects) {
        let Some(search) = calls
            .iter()
            .rev()
            .find(|c| c.success && is_search(&c.name) && c.output.get("count").and_then(Value::as_u64).unwrap_or(0) > 1)
        else {
            return;
        };
        let plural = format!("{}s", entity_kind_of(&search.name).as_str());
        let candidates: Vec<(String, String, Option<String>)> = search
            .output
            .get(&plural)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?.to_string();
                let title = item.get("title").and_then(Value::as_str).unwrap_or(id.as_str()).to_string();
                let group = item.get("project").and_then(Value::as_str).map(String::from);
                Some((id, title, group))
            })
            .collect();
        let count = candidates.len();
        let query = search.output.get("query").and_then(Value::as_str).unwrap_or_default();

        match self.memory.disambiguation.offer(session, query, candidates).await {
            Ok(true) => {
                info!(session_id = session, candidates = count, "Disambiguation pending");
                self.written(Collection::Working, format!("disambiguation:{session}"));
                effects.disambiguation = Some(count);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Disambiguation write failed");
                effects.errors.push(e.to_string());
            }
        }
    }
}
