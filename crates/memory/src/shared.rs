//! Shared memory: short-lived handoffs between agents.
//!
//! A handoff is written pending and claimed at most once. Claiming goes
//! through the store's atomic claim primitive so two claimers racing on the
//! same handoff never both win.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Claimed,
}

impl HandoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffStatus::Pending => "pending",
            HandoffStatus::Claimed => "claimed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub session_id: String,
    pub source_agent: String,
    pub target_agent: String,
    pub payload: serde_json::Value,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SharedMemory {
    store: Arc<dyn MemoryStore>,
    ttl: Duration,
}

impl SharedMemory {
    pub fn new(store: Arc<dyn MemoryStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn filter(target_agent: &str, session_id: Option<&str>) -> RecordFilter {
        let filter = RecordFilter::new().field_eq("target_agent", target_agent);
        match session_id {
            Some(session) => filter.field_eq("session_id", session),
            None => filter,
        }
    }

    /// Create a pending handoff.
    pub async fn write(
        &self,
        session_id: &str,
        source_agent: &str,
        target_agent: &str,
        payload: serde_json::Value,
    ) -> Result<Handoff, MemoryError> {
        let now = Utc::now();
        let handoff = Handoff {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source_agent: source_agent.to_string(),
            target_agent: target_agent.to_string(),
            payload,
            status: HandoffStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let value = serde_json::to_value(&handoff)
            .map_err(|e| MemoryError::Storage(format!("Handoff serialization: {e}")))?;
        self.store
            .put(
                MemoryRecord::new(Collection::Shared, handoff.id.clone(), value)
                    .with_created_at(now)
                    .with_ttl(self.ttl),
            )
            .await?;
        info!(id = %handoff.id, source = source_agent, target = target_agent, "Handoff written");
        Ok(handoff)
    }

    /// Atomically take the oldest pending handoff for `target_agent`.
    /// `None` means nothing is pending.
    pub async fn claim(
        &self,
        target_agent: &str,
        session_id: Option<&str>,
    ) -> Result<Option<Handoff>, MemoryError> {
        let claimed = self
            .store
            .claim(
                Collection::Shared,
                &Self::filter(target_agent, session_id),
                "status",
                HandoffStatus::Pending.as_str(),
                HandoffStatus::Claimed.as_str(),
            )
            .await?;
        match claimed {
            Some(record) => {
                let handoff: Handoff = record.decode()?;
                debug!(id = %handoff.id, target = target_agent, "Handoff claimed");
                Ok(Some(handoff))
            }
            None => Ok(None),
        }
    }

    /// Pending handoffs for `target_agent` without claiming them.
    pub async fn peek(
        &self,
        target_agent: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Handoff>, MemoryError> {
        let filter = Self::filter(target_agent, session_id).field_eq("status", HandoffStatus::Pending.as_str());
        self.decode_all(&filter).await
    }

    /// Every live handoff, newest first.
    pub async fn list(&self) -> Result<Vec<Handoff>, MemoryError> {
        self.decode_all(&RecordFilter::new()).await
    }

    async fn decode_all(&self, filter: &RecordFilter) -> Result<Vec<Handoff>, MemoryError> {
        self.store
            .scan(Collection::Shared, filter)
            .await?
            .iter()
            .map(|r| r.decode())
            .collect()
    }
}
