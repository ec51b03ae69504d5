//! Phrase matchers for memory side effects.
//!
//! Each matcher recognises one kind of statement and is tried
//! independently; the router decides what to do with the signals.

use regex_lite::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use steward_memory::{contains_phrase, normalize_trigger};

/// Something a matcher recognised in an utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// "I'm focusing on Voice Agent today"
    Focus { project: String },
    /// "only show urgent tasks"
    Priority { level: String },
    /// "When I say done, complete the current task"
    RuleDeclaration {
        trigger: String,
        action_type: String,
        params: Value,
    },
    /// "switching to something else"
    ContextSwitch,
    /// "my preferred standup time is 9am"
    PreferenceStatement { key: String, value: String },
    /// "the second one" (1-based)
    Selection { index: usize },
}

pub trait Matcher: Send + Sync {
    fn tag(&self) -> &'static str;

    fn detect(&self, utterance: &str) -> Option<Signal>;
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Straight apostrophes and trimmed; the matchers keep the original case.
fn prepare(utterance: &str) -> String {
    utterance.replace('\u{2019}', "'").trim().to_string()
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().trim_matches(['"', '\'', '“', '”']).trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Canonical priority level for a phrase such as "High-priority".
fn priority_level(phrase: &str) -> Option<String> {
    let normalized = normalize_trigger(phrase);
    ["urgent", "high", "medium", "low"]
        .into_iter()
        .find(|level| contains_phrase(&normalized, level))
        .map(String::from)
}

// ── Focus ────────────────────────────────────────────────────────────────

static FOCUS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:i'?m|i\s+am|we'?re|we\s+are)\s+(?:focusing|focused|concentrating|working)\s+on\s+(.+?)(?:\s+(?:today|tonight|this\s+(?:week|morning|afternoon|sprint)|for\s+now|right\s+now|now))?\s*[.!]*$",
        r"(?i)^(?:let'?s\s+|i\s+want\s+to\s+|i'?ll\s+)?focus\s+on\s+(.+?)(?:\s+(?:today|tonight|this\s+week|for\s+now|now))?\s*[.!]*$",
    ])
});

const NOT_A_PROJECT: [&str; 6] = ["it", "this", "that", "them", "something else", "other things"];

pub struct FocusPattern;

impl Matcher for FocusPattern {
    fn tag(&self) -> &'static str {
        "focus"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        let project = first_capture(&FOCUS, &prepare(utterance))?;
        let normalized = normalize_trigger(&project);
        if NOT_A_PROJECT.contains(&normalized.as_str()) || PriorityPattern.detect(utterance).is_some() {
            return None;
        }
        Some(Signal::Focus { project })
    }
}

// ── Priority filter ──────────────────────────────────────────────────────

static PRIORITY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:only|just)\s+(?:show\s+(?:me\s+)?)?(?:the\s+)?((?:urgent|high|medium|low)(?:[\s-]+priority)?)\b",
        r"(?i)\b((?:urgent|high|medium|low)(?:[\s-]+priority)?)\s+(?:tasks\s+|items\s+|ones\s+)?only\b",
        r"(?i)\b(?:focus|focusing|concentrate|concentrating)\s+on\s+(?:the\s+|my\s+)?(urgent|(?:high|medium|low)[\s-]+priority)\b",
        r"(?i)\bfilter\s+(?:by|to|for|on)\s+((?:urgent|high|medium|low)(?:[\s-]+priority)?)\b",
    ])
});

pub struct PriorityPattern;

impl Matcher for PriorityPattern {
    fn tag(&self) -> &'static str {
        "priority"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        let phrase = first_capture(&PRIORITY, &prepare(utterance))?;
        priority_level(&phrase).map(|level| Signal::Priority { level })
    }
}

// ── Rule declarations ────────────────────────────────────────────────────

static RULE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^(?:from\s+now\s+on\s*,?\s*)?(?:when(?:ever)?|if|each\s+time|every\s+time)\s+i\s+say\s+["'“]?(.+?)["'”]?(?:\s*,\s*(?:then\s+)?|\s+then\s+|\s+(?:it\s+)?means\s+)(?:please\s+|you\s+should\s+|that\s+means\s+)?(.+?)\s*[.!]*$"#,
    )
    .ok()
});

/// Map the action half of a rule declaration to an action type.
fn classify_action(action: &str) -> &'static str {
    let normalized = normalize_trigger(action);
    let has = |words: &[&str]| words.iter().any(|w| contains_phrase(&normalized, w));

    if has(&["complete", "finish", "done", "close", "mark it done", "mark it as done"]) {
        "complete_current_task"
    } else if has(&["start", "begin", "resume"]) {
        "start_current_task"
    } else if has(&["stop", "pause"]) {
        "stop_current_task"
    } else if has(&["list", "show"]) && has(&["task", "tasks"]) {
        "list_tasks"
    } else {
        "instruction"
    }
}

pub struct RuleDeclarationPattern;

impl Matcher for RuleDeclarationPattern {
    fn tag(&self) -> &'static str {
        "rule_declaration"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        let text = prepare(utterance);
        let caps = RULE.as_ref()?.captures(&text)?;
        let trigger = normalize_trigger(caps.get(1)?.as_str());
        let action = caps.get(2)?.as_str().trim();
        if trigger.is_empty() || action.is_empty() {
            return None;
        }
        Some(Signal::RuleDeclaration {
            trigger,
            action_type: classify_action(action).to_string(),
            params: json!({ "instruction": action }),
        })
    }
}

// ── Context switches ─────────────────────────────────────────────────────

static SWITCH: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bswitch(?:ing)?\s+(?:gears|context|contexts|topics?)\b",
        r"(?i)\b(?:let'?s\s+|i'?m\s+|i\s+am\s+)?switch(?:ing)?\s+(?:over\s+)?to\b",
        r"(?i)\b(?:let'?s\s+)?mov(?:e|ing)\s+on\b",
        r"(?i)\bchange\s+of\s+plans?\b",
        r"(?i)\b(?:different|new|another)\s+(?:topic|subject)\b",
    ])
});

pub struct ContextSwitchPattern;

impl Matcher for ContextSwitchPattern {
    fn tag(&self) -> &'static str {
        "context_switch"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        let text = prepare(utterance);
        SWITCH.iter().any(|re| re.is_match(&text)).then_some(Signal::ContextSwitch)
    }
}

// ── Preference statements ────────────────────────────────────────────────

static PREFERENCE_NAMED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmy\s+(?:preferred|favou?rite|default|usual)\s+([a-z][a-z ]{0,40}?)\s+(?:is|are)\s+(.+?)\s*[.!]*$").ok()
});

static PREFERENCE_FREE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[.!,]\s*)i\s+(?:always\s+|really\s+)?(?:prefer|like)\s+(.+?)\s*[.!]*$").ok());

/// `snake_case` key from the first few words of a phrase.
fn slug(text: &str, max_words: usize) -> String {
    normalize_trigger(text)
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join("_")
}

pub struct PreferenceStatementPattern;

impl Matcher for PreferenceStatementPattern {
    fn tag(&self) -> &'static str {
        "preference_statement"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        let text = prepare(utterance);

        if let Some(caps) = PREFERENCE_NAMED.as_ref().and_then(|re| re.captures(&text)) {
            let key = slug(caps.get(1)?.as_str(), 4);
            let value = caps.get(2)?.as_str().trim().to_string();
            if !key.is_empty() && !value.is_empty() {
                return Some(Signal::PreferenceStatement { key, value });
            }
        }

        let caps = PREFERENCE_FREE.as_ref()?.captures(&text)?;
        let value = caps.get(1)?.as_str().trim().to_string();
        let key = slug(&value, 4);
        (!key.is_empty()).then(|| Signal::PreferenceStatement {
            key: format!("prefers_{key}"),
            value,
        })
    }
}

// ── Positional selections ────────────────────────────────────────────────

/// Matches only while a disambiguation set of `candidates` is pending.
pub struct SelectionPattern {
    pub candidates: usize,
}

impl Matcher for SelectionPattern {
    fn tag(&self) -> &'static str {
        "selection"
    }

    fn detect(&self, utterance: &str) -> Option<Signal> {
        steward_memory::parse_selection(utterance, self.candidates).map(|index| Signal::Selection { index })
    }
}

/// The side-effect matchers, in the order their signals are applied.
pub fn side_effect_matchers() -> [&'static dyn Matcher; 5] {
    [
        &ContextSwitchPattern,
        &FocusPattern,
        &PriorityPattern,
        &RuleDeclarationPattern,
        &PreferenceStatementPattern,
    ]
}

/// Every signal the side-effect matchers find in an utterance.
pub fn detect_signals(utterance: &str) -> Vec<Signal> {
    side_effect_matchers()
        .into_iter()
        .filter_map(|m| m.detect(utterance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_statement() {
        assert_eq!(
            FocusPattern.detect("I'm focusing on Voice Agent today"),
            Some(Signal::Focus {
                project: "Voice Agent".into()
            })
        );
        assert_eq!(
            FocusPattern.detect("let's focus on Billing revamp."),
            Some(Signal::Focus {
                project: "Billing revamp".into()
            })
        );
        assert_eq!(FocusPattern.detect("I'm working on it now"), None);
        assert_eq!(FocusPattern.detect("focus on urgent tasks"), None);
    }

    #[test]
    fn priority_filter() {
        assert_eq!(
            PriorityPattern.detect("only show me high priority"),
            Some(Signal::Priority { level: "high".into() })
        );
        assert_eq!(
            PriorityPattern.detect("Urgent tasks only please"),
            Some(Signal::Priority { level: "urgent".into() })
        );
        assert_eq!(PriorityPattern.detect("create a high priority task"), None);
    }

    #[test]
    fn rule_declaration() {
        let signal = RuleDeclarationPattern.detect("When I say done, complete the current task").unwrap();
        let Signal::RuleDeclaration {
            trigger, action_type, ..
        } = signal
        else {
            panic!("expected a rule");
        };
        assert_eq!(trigger, "done");
        assert_eq!(action_type, "complete_current_task");

        let Some(Signal::RuleDeclaration {
            trigger, action_type, ..
        }) = RuleDeclarationPattern.detect("whenever I say \"standup\" then list my tasks")
        else {
            panic!("expected a rule");
        };
        assert_eq!(trigger, "standup");
        assert_eq!(action_type, "list_tasks");

        assert!(RuleDeclarationPattern.detect("I'm done with this").is_none());
    }

    #[test]
    fn context_switch() {
        assert!(ContextSwitchPattern.detect("OK, switching to the billing work").is_some());
        assert!(ContextSwitchPattern.detect("change of plans").is_some());
        assert!(ContextSwitchPattern.detect("let's move on").is_some());
        assert!(ContextSwitchPattern.detect("complete the task").is_none());
    }

    #[test]
    fn preference_statements() {
        assert_eq!(
            PreferenceStatementPattern.detect("My preferred standup time is 9am."),
            Some(Signal::PreferenceStatement {
                key: "standup_time".into(),
                value: "9am".into()
            })
        );
        assert_eq!(
            PreferenceStatementPattern.detect("I prefer short answers"),
            Some(Signal::PreferenceStatement {
                key: "prefers_short_answers".into(),
                value: "short answers".into()
            })
        );
        assert!(PreferenceStatementPattern.detect("I'd like to create a task").is_none());
    }

    #[test]
    fn focus_utterance_yields_no_rule() {
        let signals = detect_signals("I'm focusing on Voice Agent today");
        assert_eq!(
            signals,
            vec![Signal::Focus {
                project: "Voice Agent".into()
            }]
        );
    }

    #[test]
    fn selection_needs_a_pending_set() {
        assert_eq!(
            SelectionPattern { candidates: 3 }.detect("the second one"),
            Some(Signal::Selection { index: 2 })
        );
        assert_eq!(
            SelectionPattern { candidates: 3 }.detect("last"),
            Some(Signal::Selection { index: 3 })
        );
        assert_eq!(SelectionPattern { candidates: 3 }.detect("show the second task list"), None);
    }
}
