//! Pattern matchers: side-effect signals, intent classification and
//! compound-request detection.
//!
//! Every matcher is a small independent unit so each can be tested on its
//! own; the router only consumes their outputs.

pub mod intent;
pub mod signals;

pub use intent::{Intent, classify_intent, looks_multi_step};
pub use signals::{
    ContextSwitchPattern, FocusPattern, Matcher, PreferenceStatementPattern, PriorityPattern, RuleDeclarationPattern,
    SelectionPattern, Signal, detect_signals, side_effect_matchers,
};
