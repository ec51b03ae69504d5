//! Pattern extraction of workflow parameters from raw user text.
//!
//! Each `ExtractField` has a small ordered list of patterns; the first one
//! that matches wins. Due dates are normalized to ISO `YYYY-MM-DD`
//! relative to a supplied "today".

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex_lite::Regex;
use std::sync::LazyLock;
use steward_memory::ExtractField;

/// Words that end a free-text capture (title, project name, date phrase).
const STOP: &str = r"(?:in|under|to|by|due|before|with|assigned|assign|priority|for|and)";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

static TITLE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"["“]([^"”]+)["”]"#.to_string(),
        r"'([^']{2,})'".to_string(),
        format!(r"(?i)\b(?:called|titled|named)\s+(.+?)(?:\s+{STOP}\b.*)?$"),
        format!(
            r"(?i)\b(?:create|add|make|log|file|report|open|track)\s+(?:(?:a|an|the|new)\s+)*(?:(?:task|bug|issue|ticket|item|todo)\s*)?(?::\s*|(?:about|to)\s+)?(.+?)(?:\s+{STOP}\b.*)?$"
        ),
    ])
});

static GROUP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:in|under|for|to)\s+(?:the\s+)?(.+?)\s+project\b".to_string(),
        r#"(?i)\bproject\s+(?:called\s+|named\s+)?["']?([^"',.]+?)["']?(?:\s+(?:by|due|before|with|assigned|priority|and)\b|[,.]|$)"#
            .to_string(),
    ])
});

static PRIORITY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(low|medium|normal|high|urgent|critical)[\s-]+priority\b".to_string(),
        r"(?i)\bpriority\s*(?:is|of|:|=)?\s*(low|medium|normal|high|urgent|critical)\b".to_string(),
        r"(?i)\b(urgent|asap|critical)\b".to_string(),
    ])
});

static ASSIGNEE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bassign(?:ed)?\s+(?:it\s+)?to\s+@?([A-Za-z][\w.\-]*)".to_string(),
        r"@([A-Za-z][\w.\-]*)".to_string(),
    ])
});

static DUE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:due|by|before|on)\s+(.+?)(?:\s+(?:in|under|with|assigned|priority|for|and)\b|[,.]|$)".to_string(),
        r"(?i)\b(today|tonight|tomorrow|next\s+week|end\s+of\s+(?:the\s+)?week|in\s+\d+\s+(?:days?|weeks?))\b".to_string(),
    ])
});

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().trim_end_matches(['.', '!', '?', ',']).trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn normalize_priority(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "asap" | "critical" => "urgent".into(),
        "normal" => "medium".into(),
        other => other.into(),
    }
}

fn weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// The next `target` strictly after `today`.
fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let ahead = (target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64 + 7) % 7;
    today + Duration::days(if ahead == 0 { 7 } else { ahead })
}

/// Parse a relative or absolute date phrase into a date.
pub fn parse_due(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    let phrase = phrase.trim().to_lowercase();
    let words: Vec<&str> = phrase.split_whitespace().filter(|w| *w != "the").collect();

    if let Some(first) = words.first() {
        if let Ok(date) = NaiveDate::parse_from_str(first, "%Y-%m-%d") {
            return Some(date);
        }
    }

    match words.as_slice() {
        ["today", ..] | ["tonight", ..] | ["eod", ..] => Some(today),
        ["tomorrow", ..] => Some(today + Duration::days(1)),
        ["next", "week", ..] => Some(today + Duration::days(7)),
        ["end", "of", "week", ..] | ["eow", ..] => {
            if today.weekday() == Weekday::Fri {
                Some(today)
            } else {
                Some(next_weekday(today, Weekday::Fri))
            }
        }
        ["in", n, unit, ..] => {
            let n: i64 = n.parse().ok()?;
            match unit.trim_end_matches('s') {
                "day" => Some(today + Duration::days(n)),
                "week" => Some(today + Duration::days(7 * n)),
                _ => None,
            }
        }
        ["next" | "this", day, ..] => weekday(day).map(|w| next_weekday(today, w)),
        [day, ..] => weekday(day).map(|w| next_weekday(today, w)),
        [] => None,
    }
}

/// Extract one field from user text. The value is ready to use as a tool
/// parameter (priorities normalized, due dates as ISO strings).
pub fn extract(field: ExtractField, text: &str, today: NaiveDate) -> Option<String> {
    match field {
        ExtractField::Title => first_capture(&TITLE, text),
        ExtractField::Group => first_capture(&GROUP, text),
        ExtractField::Priority => first_capture(&PRIORITY, text).map(|p| normalize_priority(&p)),
        ExtractField::Assignee => first_capture(&ASSIGNEE, text),
        ExtractField::Due => DUE.iter().find_map(|re| {
            let phrase = re.captures(text)?.get(1)?.as_str().to_string();
            parse_due(&phrase, today).map(|d| d.format("%Y-%m-%d").to_string())
        }),
    }
}
