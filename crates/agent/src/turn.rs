//! Per-turn request and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_core::message::Message;

/// One user utterance to route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub utterance: String,
    pub session_id: String,
    pub user_id: String,
    /// Prior conversation, oldest first, without a system message
    #[serde(default)]
    pub history: Vec<Message>,
}

impl TurnRequest {
    pub fn new(utterance: impl Into<String>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Which routing stage claimed the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// A positional reply to a pending disambiguation set
    Selection,
    /// A: learned rule trigger
    Rule,
    /// B: stored workflow
    Workflow,
    /// C: multi-step decomposition
    MultiStep,
    /// D: general tool-use loop
    ToolLoop,
    /// E: external capability discovery
    Discovery,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Selection => "selection",
            Tier::Rule => "rule",
            Tier::Workflow => "workflow",
            Tier::MultiStep => "multi_step",
            Tier::ToolLoop => "tool_loop",
            Tier::Discovery => "discovery",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    /// The tool loop hit its iteration cap
    CapacityExceeded,
    /// A workflow or plan stopped at a failing step
    PartialFailure,
    /// Discovery found nothing that could serve the request
    NoSuitableCapability,
    /// The request needs an external capability and discovery is off
    CapabilityUnavailable,
    /// A bounded external call ran out of time; safe to retry
    TimedOut,
    /// Something unexpected; the response carries the error text
    Error,
}

/// One tool invocation made while serving the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub success: bool,
    pub output: Value,
}

/// Memory writes made after the tier ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideEffects {
    /// Working fields written (`focus`, `task`, `last_action`, `priority_filter`)
    pub working_fields: Vec<String>,
    pub context_cleared: bool,
    /// Key of the preference recorded this turn
    pub preference: Option<String>,
    /// Normalized trigger of the rule recorded this turn
    pub rule: Option<String>,
    /// Action records appended
    pub actions: usize,
    /// Candidate count of a newly pending disambiguation set
    pub disambiguation: Option<usize>,
    /// Writes that failed; the turn still completes
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub response: String,
    /// `None` when the turn failed before any tier claimed it
    pub tier: Option<Tier>,
    pub outcome: TurnOutcome,
    pub side_effects: SideEffects,
    pub tool_calls: Vec<ToolInvocation>,
    /// LLM round trips made by the tool loop
    pub iterations: usize,
}
