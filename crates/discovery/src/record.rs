//! Discovery records and request fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// How a request was served: which capability, with which arguments
    Solution,
    /// What the capability answered
    Answer,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Solution => "solution",
            RecordKind::Answer => "answer",
        }
    }

    pub fn key_prefix(&self) -> String {
        format!("{}:", self.as_str())
    }
}

/// A capability call that served a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionDescriptor {
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub id: String,
    pub kind: RecordKind,
    pub request: String,
    #[serde(default)]
    pub intent: Option<String>,
    /// SHA-256 of the normalized request
    pub fingerprint: String,
    #[serde(default)]
    pub solution: Option<SolutionDescriptor>,
    /// Truncated result (or failure reason)
    #[serde(default)]
    pub result_preview: String,
    /// Full answer text (answer records only)
    #[serde(default)]
    pub answer: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub times_used: u32,
    pub created_at: DateTime<Utc>,
}

impl DiscoveryRecord {
    pub fn new(kind: RecordKind, request: &str, intent: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            request: request.to_string(),
            intent: intent.map(String::from),
            fingerprint: fingerprint(request),
            solution: None,
            result_preview: String::new(),
            answer: None,
            success: false,
            times_used: 0,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}{}", self.kind.key_prefix(), self.id)
    }
}

/// Lowercase, drop apostrophes, turn other punctuation into spaces and
/// collapse whitespace.
pub fn normalize_request(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact-text identity of a request, insensitive to case and punctuation.
pub fn fingerprint(text: &str) -> String {
    format!("{:x}", Sha256::digest(normalize_request(text).as_bytes()))
}

/// At most `max_chars` characters, on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
