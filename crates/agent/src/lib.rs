//! The request router for Steward.
//!
//! A turn flows through:
//!
//! 1. **Selection**: a positional reply to a pending disambiguation set
//! 2. **Tiers A-E**: learned rule, stored workflow, multi-step plan,
//!    tool-use loop, external discovery; first claim wins
//! 3. **Side effects**: working memory, preference and rule extraction,
//!    action records and disambiguation state
//!
//! `Router::handle_turn` never fails; errors become a textual answer with
//! outcome `Error`.

pub mod context;
pub mod loop_runner;
pub mod multi_step;
pub mod patterns;
pub mod router;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use context::{ContextBlock, ContextSettings};
pub use loop_runner::{LoopRun, LoopSettings, ToolLoop, compress_result, execute_call};
pub use multi_step::{MultiStepPlanner, PlanReport, PlanStep, PlanStepResult, derive_entity_name, parse_plan};
pub use patterns::{Intent, Signal, classify_intent, detect_signals, looks_multi_step};
pub use router::Router;
pub use turn::{SideEffects, Tier, ToolInvocation, TurnOutcome, TurnRequest, TurnResult};
