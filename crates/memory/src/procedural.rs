//! Procedural memory: learned rules, stored workflows and task templates.
//!
//! Rules are per user and unique per normalized trigger. Workflows and
//! templates are global and read-mostly; they are seeded from outside
//! (CLI import or API) and only their usage counters change at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use steward_core::embedding::Embedder;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use tracing::{debug, info, warn};

/// Lowercase, drop quotes and apostrophes, turn other punctuation into
/// spaces and collapse runs of whitespace.
pub fn normalize_trigger(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\u{2019}' | '\u{201c}' | '\u{201d}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment of an already-normalized phrase.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {haystack} ").contains(&format!(" {phrase} "))
}

// ── Rules ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub user_id: String,
    /// Normalized trigger phrase
    pub trigger: String,
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub confidence: f32,
    pub times_used: u32,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rule precedence: confidence, then most recently used (never-used last),
/// then the longer trigger, then trigger text.
pub fn rule_precedence(a: &Rule, b: &Rule) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.last_used_at, b.last_used_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.trigger.len().cmp(&a.trigger.len()))
        .then_with(|| a.trigger.cmp(&b.trigger))
}

// ── Workflows ────────────────────────────────────────────────────────────

/// A field a workflow step may pull out of the raw user text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractField {
    Title,
    /// Project name
    Group,
    Priority,
    Assignee,
    /// Relative or absolute date, normalized to ISO
    Due,
}

impl ExtractField {
    pub fn param_name(&self) -> &'static str {
        match self {
            ExtractField::Title => "title",
            ExtractField::Group => "project",
            ExtractField::Priority => "priority",
            ExtractField::Assignee => "assignee",
            ExtractField::Due => "due_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Tool name to invoke
    pub operation: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub extract: Vec<ExtractField>,
    /// Parameter name → `step_N.key` reference to an earlier capture
    #[serde(default)]
    pub bind: BTreeMap<String, String>,
    #[serde(default)]
    pub capture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub times_used: u32,
}

impl Workflow {
    fn embedding_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.description);
        for trigger in &self.triggers {
            text.push(' ');
            text.push_str(trigger);
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowMatch {
    pub workflow: Workflow,
    /// `None` for a trigger-phrase hit
    pub similarity: Option<f32>,
}

// ── Templates ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateTask {
    pub title: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub tasks: Vec<TemplateTask>,
}

impl Template {
    fn hits(&self, normalized: &str) -> usize {
        let category = usize::from(contains_phrase(normalized, &normalize_trigger(&self.category)));
        let keywords = self
            .keywords
            .iter()
            .filter(|k| contains_phrase(normalized, &normalize_trigger(k)))
            .count();
        category + keywords
    }
}

// ── Manager ──────────────────────────────────────────────────────────────

pub struct ProceduralMemory {
    store: Arc<dyn MemoryStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

fn rule_key(user_id: &str, trigger: &str) -> String {
    format!("rule:{user_id}:{trigger}")
}

fn workflow_key(name: &str) -> String {
    format!("workflow:{name}")
}

fn template_key(name: &str) -> String {
    format!("template:{name}")
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<serde_json::Value, MemoryError> {
    serde_json::to_value(value).map_err(|e| MemoryError::Storage(format!("{what} serialization: {e}")))
}

impl ProceduralMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    async fn put_rule(&self, rule: &Rule) -> Result<(), MemoryError> {
        self.store
            .put(
                MemoryRecord::new(Collection::Procedural, rule_key(&rule.user_id, &rule.trigger), to_json(rule, "Rule")?)
                    .with_created_at(rule.created_at),
            )
            .await
    }

    pub async fn get_rule(&self, user_id: &str, trigger: &str) -> Result<Option<Rule>, MemoryError> {
        let key = rule_key(user_id, &normalize_trigger(trigger));
        match self.store.get(Collection::Procedural, &key).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Insert or merge a rule keyed by its normalized trigger.
    pub async fn record_rule(
        &self,
        user_id: &str,
        trigger: &str,
        action_type: &str,
        params: serde_json::Value,
        confidence: f32,
    ) -> Result<Rule, MemoryError> {
        let trigger = normalize_trigger(trigger);
        if trigger.is_empty() {
            return Err(MemoryError::Storage("Rule trigger is empty after normalization".into()));
        }
        let confidence = confidence.clamp(0.0, 1.0);
        let now = Utc::now();

        let rule = match self.get_rule(user_id, &trigger).await? {
            Some(existing) => Rule {
                action_type: action_type.to_string(),
                params,
                confidence: existing.confidence.max(confidence),
                times_used: existing.times_used.saturating_add(1),
                updated_at: now,
                ..existing
            },
            None => Rule {
                user_id: user_id.to_string(),
                trigger,
                action_type: action_type.to_string(),
                params,
                confidence,
                times_used: 1,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.put_rule(&rule).await?;
        info!(user_id, trigger = %rule.trigger, action = %rule.action_type, times_used = rule.times_used, "Rule stored");
        Ok(rule)
    }

    /// A user's rules at or above `min_confidence`, in precedence order.
    pub async fn rules(&self, user_id: &str, min_confidence: f32) -> Result<Vec<Rule>, MemoryError> {
        let filter = RecordFilter::new()
            .prefix(format!("rule:{user_id}:"))
            .field_eq("user_id", user_id);
        let mut rules: Vec<Rule> = self
            .store
            .scan(Collection::Procedural, &filter)
            .await?
            .iter()
            .map(|r| r.decode())
            .collect::<Result<Vec<Rule>, _>>()?
            .into_iter()
            .filter(|r| r.confidence >= min_confidence)
            .collect();
        rules.sort_by(rule_precedence);
        Ok(rules)
    }

    /// The highest-precedence rule whose trigger is a substring of the
    /// normalized utterance.
    pub async fn match_rule(
        &self,
        user_id: &str,
        utterance: &str,
        min_confidence: f32,
    ) -> Result<Option<Rule>, MemoryError> {
        let normalized = normalize_trigger(utterance);
        let hit = self
            .rules(user_id, min_confidence)
            .await?
            .into_iter()
            .find(|r| !r.trigger.is_empty() && normalized.contains(r.trigger.as_str()));
        if let Some(rule) = &hit {
            debug!(user_id, trigger = %rule.trigger, "Rule matched");
        }
        Ok(hit)
    }

    /// Bump usage and recency after a rule fired.
    pub async fn mark_rule_used(&self, user_id: &str, trigger: &str) -> Result<Option<Rule>, MemoryError> {
        let Some(mut rule) = self.get_rule(user_id, trigger).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        rule.times_used = rule.times_used.saturating_add(1);
        rule.last_used_at = Some(now);
        rule.updated_at = now;
        self.put_rule(&rule).await?;
        Ok(Some(rule))
    }

    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), MemoryError> {
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&workflow.embedding_text()).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(workflow = %workflow.name, error = %e, "Workflow embedding failed");
                    None
                }
            },
            None => None,
        };
        self.store
            .put(
                MemoryRecord::new(Collection::Procedural, workflow_key(&workflow.name), to_json(workflow, "Workflow")?)
                    .with_embedding(embedding),
            )
            .await?;
        info!(workflow = %workflow.name, steps = workflow.steps.len(), "Workflow saved");
        Ok(())
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>, MemoryError> {
        match self.store.get(Collection::Procedural, &workflow_key(name)).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// All workflows, most used first.
    pub async fn workflows(&self) -> Result<Vec<Workflow>, MemoryError> {
        let mut workflows: Vec<Workflow> = self
            .store
            .scan(Collection::Procedural, &RecordFilter::new().prefix("workflow:"))
            .await?
            .iter()
            .map(|r| r.decode())
            .collect::<Result<_, _>>()?;
        workflows.sort_by(|a, b| b.times_used.cmp(&a.times_used).then_with(|| a.name.cmp(&b.name)));
        Ok(workflows)
    }

    /// Increment a workflow's usage counter, keeping its embedding.
    pub async fn record_workflow_use(&self, name: &str) -> Result<Option<u32>, MemoryError> {
        let Some(mut record) = self.store.get(Collection::Procedural, &workflow_key(name)).await? else {
            return Ok(None);
        };
        let mut workflow: Workflow = record.decode()?;
        workflow.times_used = workflow.times_used.saturating_add(1);
        record.value = to_json(&workflow, "Workflow")?;
        record.updated_at = Utc::now();
        self.store.put(record).await?;
        Ok(Some(workflow.times_used))
    }

    /// Trigger-phrase containment first (longest trigger wins), then
    /// embedding similarity at or above `threshold`.
    pub async fn find_workflow(
        &self,
        utterance: &str,
        threshold: f32,
    ) -> Result<Option<WorkflowMatch>, MemoryError> {
        let normalized = normalize_trigger(utterance);
        let workflows = self.workflows().await?;

        let by_trigger = workflows
            .iter()
            .filter_map(|w| {
                w.triggers
                    .iter()
                    .map(|t| normalize_trigger(t))
                    .filter(|t| contains_phrase(&normalized, t))
                    .map(|t| t.len())
                    .max()
                    .map(|len| (len, w))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.name.cmp(&a.1.name)));
        if let Some((_, workflow)) = by_trigger {
            debug!(workflow = %workflow.name, "Workflow matched by trigger");
            return Ok(Some(WorkflowMatch {
                workflow: workflow.clone(),
                similarity: None,
            }));
        }

        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let embedding = match embedder.embed(utterance).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Workflow match embedding failed");
                return Ok(None);
            }
        };
        match self
            .store
            .nearest(
                Collection::Procedural,
                &embedding,
                &RecordFilter::new().prefix("workflow:"),
                1,
                threshold,
            )
            .await
        {
            Ok(hits) => match hits.into_iter().next() {
                Some(hit) => {
                    debug!(key = %hit.record.key, score = hit.score, "Workflow matched by similarity");
                    Ok(Some(WorkflowMatch {
                        workflow: hit.record.decode()?,
                        similarity: Some(hit.score),
                    }))
                }
                None => Ok(None),
            },
            Err(MemoryError::IndexUnavailable(reason)) => {
                debug!(%reason, "No similarity index for workflows");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save_template(&self, template: &Template) -> Result<(), MemoryError> {
        self.store
            .put(MemoryRecord::new(
                Collection::Procedural,
                template_key(&template.name),
                to_json(template, "Template")?,
            ))
            .await
    }

    pub async fn templates(&self) -> Result<Vec<Template>, MemoryError> {
        let mut templates: Vec<Template> = self
            .store
            .scan(Collection::Procedural, &RecordFilter::new().prefix("template:"))
            .await?
            .iter()
            .map(|r| r.decode())
            .collect::<Result<_, _>>()?;
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    /// The template with the most category/keyword hits in `text`.
    pub async fn find_template(&self, text: &str) -> Result<Option<Template>, MemoryError> {
        let normalized = normalize_trigger(text);
        let best = self
            .templates()
            .await?
            .into_iter()
            .map(|t| (t.hits(&normalized), t))
            .filter(|(hits, _)| *hits > 0)
            // templates() is name-sorted; keep the first of equal scores
            .fold(None::<(usize, Template)>, |best, (hits, t)| match best {
                Some((h, _)) if h >= hits => best,
                _ => Some((hits, t)),
            });
        Ok(best.map(|(_, t)| t))
    }
}
