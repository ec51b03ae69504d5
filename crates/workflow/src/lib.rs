//! Workflow execution for Steward.
//!
//! Stored workflows (procedural memory) are fixed sequences of tool calls.
//! The executor fills each step's parameters from the user's text and from
//! values captured by earlier steps, then runs the steps in order.

pub mod executor;
pub mod extract;
pub mod library;

pub use executor::{StepResult, WorkflowExecutor, WorkflowRun, capture_value};
pub use extract::{extract, parse_due};
pub use library::{ImportSummary, WorkflowLibrary};
