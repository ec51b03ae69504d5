//! Keyword intent classification and compound-request detection.

use serde::{Deserialize, Serialize};
use steward_memory::{contains_phrase, normalize_trigger};

/// The closed set of intents the router distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TaskManagement,
    ProjectManagement,
    Annotation,
    History,
    Templates,
    /// Needs a capability outside the static catalogue
    ExternalLookup,
    Conversation,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::TaskManagement => "task_management",
            Intent::ProjectManagement => "project_management",
            Intent::Annotation => "annotation",
            Intent::History => "history",
            Intent::Templates => "templates",
            Intent::ExternalLookup => "external_lookup",
            Intent::Conversation => "conversation",
        }
    }

    /// Whether the static tool catalogue can serve this intent.
    pub fn servable_by_catalogue(&self) -> bool {
        !matches!(self, Intent::ExternalLookup)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const EXTERNAL: &[&str] = &[
    "weather",
    "forecast",
    "stock",
    "stocks",
    "share price",
    "exchange rate",
    "currency",
    "news",
    "headlines",
    "translate",
    "definition of",
    "look up",
    "lookup",
    "search the web",
    "on the web",
    "online",
    "research",
    "wikipedia",
    "population of",
    "time in",
];

const ENTITY_WORDS: &[&str] = &["task", "tasks", "todo", "todos", "project", "projects"];

const HISTORY: &[&str] = &[
    "what did i",
    "what have i",
    "yesterday",
    "last week",
    "this week",
    "history",
    "activity",
    "recap",
    "what happened",
];

const ANNOTATION: &[&str] = &["note", "notes", "decision", "decided", "context", "method", "approach"];

const TASK: &[&str] = &[
    "task", "tasks", "todo", "todos", "to do", "complete", "finish", "done", "start", "stop", "pause", "priority",
    "due", "assign", "assigned", "create", "add", "update", "show", "list", "search", "find",
];

fn has_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(normalized, p))
}

/// First matching keyword family wins; external lookups only when no task
/// or project is mentioned.
pub fn classify_intent(utterance: &str) -> Intent {
    let text = normalize_trigger(utterance);

    if has_any(&text, EXTERNAL) && !has_any(&text, ENTITY_WORDS) {
        Intent::ExternalLookup
    } else if has_any(&text, HISTORY) {
        Intent::History
    } else if has_any(&text, &["template", "templates"]) {
        Intent::Templates
    } else if has_any(&text, ANNOTATION) {
        Intent::Annotation
    } else if has_any(&text, &["project", "projects"]) {
        Intent::ProjectManagement
    } else if has_any(&text, TASK) {
        Intent::TaskManagement
    } else {
        Intent::Conversation
    }
}

const CONNECTIVES: &[&str] = &["and then", "then", "after that", "afterwards", "followed by", "once done", "and"];

const RESEARCH: &[&str] = &[
    "research",
    "look up",
    "find out",
    "investigate",
    "learn about",
    "gather",
    "study",
    "analyze",
    "analyse",
];

const CREATE: &[&str] = &["create", "set up", "setup", "make", "build", "generate", "spin up", "start a project"];

/// A sequential connective plus the research-then-create pairing.
pub fn looks_multi_step(utterance: &str) -> bool {
    let text = normalize_trigger(utterance);
    has_any(&text, CONNECTIVES) && has_any(&text, RESEARCH) && has_any(&text, CREATE)
}
