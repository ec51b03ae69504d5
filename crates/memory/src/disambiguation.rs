//! Disambiguation register.
//!
//! When a search yields several candidates, the session holds them as a
//! pending set so a follow-up like "the second one" can be resolved without
//! searching again. At most one set is pending per session; a newer
//! multi-result search replaces it.

use chrono::{DateTime, Duration, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// 1-based position in the offered list
    pub index: usize,
    pub id: String,
    pub title: String,
    /// Owning project, when known
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationSet {
    pub session_id: String,
    pub query: String,
    pub candidates: Vec<Candidate>,
    pub awaiting: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DisambiguationError {
    #[error("Nothing is awaiting a selection")]
    NothingPending,

    #[error("Selection {index} is out of range; choose 1-{max}")]
    OutOfRange { index: usize, max: usize },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub struct DisambiguationRegister {
    store: Arc<dyn MemoryStore>,
    ttl: Duration,
}

fn register_key(session_id: &str) -> String {
    format!("disambiguation:{session_id}")
}

impl DisambiguationRegister {
    pub fn new(store: Arc<dyn MemoryStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Offer search results. Returns whether a pending set was recorded;
    /// zero or one result leaves the current state untouched.
    pub async fn offer(
        &self,
        session_id: &str,
        query: &str,
        candidates: Vec<(String, String, Option<String>)>,
    ) -> Result<bool, MemoryError> {
        if candidates.len() <= 1 {
            return Ok(false);
        }

        let set = DisambiguationSet {
            session_id: session_id.to_string(),
            query: query.to_string(),
            candidates: candidates
                .into_iter()
                .enumerate()
                .map(|(i, (id, title, group))| Candidate {
                    index: i + 1,
                    id,
                    title,
                    group,
                })
                .collect(),
            awaiting: true,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&set)
            .map_err(|e| MemoryError::Storage(format!("Disambiguation serialization: {e}")))?;
        self.store
            .put(MemoryRecord::new(Collection::Working, register_key(session_id), value).with_ttl(self.ttl))
            .await?;

        debug!(session_id, query, candidates = set.candidates.len(), "Disambiguation pending");
        Ok(true)
    }

    pub async fn pending(&self, session_id: &str) -> Result<Option<DisambiguationSet>, MemoryError> {
        match self.store.get(Collection::Working, &register_key(session_id)).await? {
            Some(record) => {
                let set: DisambiguationSet = record.decode()?;
                Ok(set.awaiting.then_some(set))
            }
            None => Ok(None),
        }
    }

    /// Pick a candidate by 1-based index. A valid pick clears the set; an
    /// out-of-range pick leaves it pending.
    pub async fn resolve(&self, session_id: &str, index: usize) -> Result<Candidate, DisambiguationError> {
        let set = self
            .pending(session_id)
            .await?
            .ok_or(DisambiguationError::NothingPending)?;

        let max = set.candidates.len();
        if index == 0 || index > max {
            return Err(DisambiguationError::OutOfRange { index, max });
        }
        let candidate = set.candidates[index - 1].clone();
        self.clear(session_id).await?;

        debug!(session_id, index, id = %candidate.id, "Disambiguation resolved");
        Ok(candidate)
    }

    pub async fn clear(&self, session_id: &str) -> Result<bool, MemoryError> {
        self.store.delete(Collection::Working, &register_key(session_id)).await
    }
}

const ORDINALS: [&str; 10] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

static SELECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:i\s+(?:want|mean|choose|pick)|pick|choose|select|go\s+with)\s+)?(?:the\s+)?(?:(?P<ord>first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|last)|(?:option\s+|number\s+|no\.?\s*|#\s*)?(?P<num>\d{1,3})(?:st|nd|rd|th)?)(?:\s+(?:one|option))?(?:\s+please)?$",
    )
    .ok()
});

/// Map a positional reply to a 1-based index.
///
/// Only whole-utterance selections count ("the second one", "3", "#2",
/// "last", "option 4 please"); anything else returns `None`. Indexes past
/// `len` are still returned so the caller can report the valid range.
pub fn parse_selection(text: &str, len: usize) -> Option<usize> {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .replace(',', " ")
        .to_lowercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    let caps = SELECTION.as_ref()?.captures(&normalized)?;
    if let Some(ord) = caps.name("ord") {
        return match ord.as_str() {
            "last" => (len > 0).then_some(len),
            word => ORDINALS.iter().position(|o| *o == word).map(|i| i + 1),
        };
    }
    caps.name("num")?.as_str().parse().ok()
}
