//! The tool discovery cache.
//!
//! A request is served, in order, by:
//! 1. a cached answer to a similar request (answer floor, no execution);
//! 2. a cached solution to a very similar request (solution floor,
//!    re-executed against the catalogue);
//! 3. exact-text reuse when similarity search is unavailable;
//! 4. synthesis: the LLM picks a capability from the live catalogue, which
//!    is then invoked.
//!
//! Every synthesis attempt is logged as a record, successful or not.

use crate::error::DiscoveryError;
use crate::proposal::{Proposal, build_messages, parse_proposal};
use crate::record::{DiscoveryRecord, RecordKind, SolutionDescriptor, fingerprint, preview};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use steward_config::DiscoveryConfig;
use steward_core::capability::{CapabilityCatalogue, chunks_to_text};
use steward_core::embedding::Embedder;
use steward_core::error::{CapabilityError, MemoryError, ProviderError};
use steward_core::event::{DomainEvent, EventBus};
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use steward_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    pub solution_reuse_threshold: f32,
    pub answer_reuse_threshold: f32,
    pub handshake_timeout: Duration,
    pub invocation_timeout: Duration,
    pub preview_chars: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for DiscoverySettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            solution_reuse_threshold: config.solution_reuse_threshold,
            answer_reuse_threshold: config.answer_reuse_threshold,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            invocation_timeout: Duration::from_secs(config.invocation_timeout_secs),
            preview_chars: config.preview_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    ReusedAnswer,
    ReusedSolution,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOutcome {
    pub answer: String,
    pub provenance: Provenance,
    pub solution: Option<SolutionDescriptor>,
    /// Similarity of the reused record; `None` for exact or synthesized
    pub similarity: Option<f32>,
}

/// A reusable record and how it was found.
struct Hit {
    record: MemoryRecord,
    entry: DiscoveryRecord,
    similarity: Option<f32>,
}

pub struct ToolDiscoveryCache {
    store: Arc<dyn MemoryStore>,
    catalogue: Arc<dyn CapabilityCatalogue>,
    provider: Arc<dyn Provider>,
    model: String,
    embedder: Option<Arc<dyn Embedder>>,
    events: Option<Arc<EventBus>>,
    settings: DiscoverySettings,
}

impl ToolDiscoveryCache {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        catalogue: Arc<dyn CapabilityCatalogue>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            store,
            catalogue,
            provider,
            model: model.into(),
            embedder: None,
            events: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Serve a free-text request through reuse or synthesis.
    pub async fn discover(&self, request: &str, intent: Option<&str>) -> Result<DiscoveryOutcome, DiscoveryError> {
        let embedding = self.try_embed(request).await;

        let (answer_hit, solution_hit) = match &embedding {
            Some(vector) => match self.similar(vector).await {
                Ok(hits) => hits,
                Err(MemoryError::IndexUnavailable(reason)) => {
                    debug!(%reason, "Similarity index unavailable; using exact-text reuse");
                    self.exact(request).await?
                }
                Err(e) => return Err(e.into()),
            },
            None => self.exact(request).await?,
        };

        if let Some(hit) = answer_hit {
            return self.reuse_answer(hit).await;
        }

        if let Some(hit) = solution_hit {
            match self.reuse_solution(hit, request, intent, embedding.clone()).await {
                Ok(outcome) => return Ok(outcome),
                // A timed-out capability is surfaced, never retried within the turn
                Err(e @ (DiscoveryError::Memory(_) | DiscoveryError::Timeout { .. })) => return Err(e),
                Err(e) => warn!(error = %e, "Cached solution failed; synthesizing a new one"),
            }
        }

        self.synthesize(request, intent, embedding).await
    }

    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Discovery embedding failed");
                None
            }
        }
    }

    fn reusable(kind: RecordKind) -> RecordFilter {
        RecordFilter::new()
            .prefix(kind.key_prefix())
            .field_eq("success", "true")
    }

    fn decode_hit(record: MemoryRecord, similarity: Option<f32>) -> Result<Hit, MemoryError> {
        let entry = record.decode()?;
        Ok(Hit {
            record,
            entry,
            similarity,
        })
    }

    /// One nearest-neighbour primitive, two floors.
    async fn similar(&self, vector: &[f32]) -> Result<(Option<Hit>, Option<Hit>), MemoryError> {
        let nearest = |kind: RecordKind, floor: f32| async move {
            let hits = self
                .store
                .nearest(Collection::Discovery, vector, &Self::reusable(kind), 1, floor)
                .await?;
            hits.into_iter()
                .next()
                .map(|h| Self::decode_hit(h.record, Some(h.score)))
                .transpose()
        };

        let answer = nearest(RecordKind::Answer, self.settings.answer_reuse_threshold).await?;
        if answer.is_some() {
            return Ok((answer, None));
        }
        let solution = nearest(RecordKind::Solution, self.settings.solution_reuse_threshold).await?;
        Ok((None, solution))
    }

    async fn exact(&self, request: &str) -> Result<(Option<Hit>, Option<Hit>), MemoryError> {
        let print = fingerprint(request);
        let first = |kind: RecordKind| {
            let filter = Self::reusable(kind).field_eq("fingerprint", print.clone()).limit(1);
            async move {
                self.store
                    .scan(Collection::Discovery, &filter)
                    .await?
                    .into_iter()
                    .next()
                    .map(|r| Self::decode_hit(r, None))
                    .transpose()
            }
        };

        let answer = first(RecordKind::Answer).await?;
        if answer.is_some() {
            return Ok((answer, None));
        }
        Ok((None, first(RecordKind::Solution).await?))
    }

    async fn bump(&self, mut hit: Hit) -> Result<DiscoveryRecord, MemoryError> {
        hit.entry.times_used = hit.entry.times_used.saturating_add(1);
        hit.record.value = serde_json::to_value(&hit.entry)
            .map_err(|e| MemoryError::Storage(format!("Discovery record serialization: {e}")))?;
        hit.record.updated_at = Utc::now();
        self.store.put(hit.record).await?;
        Ok(hit.entry)
    }

    async fn reuse_answer(&self, hit: Hit) -> Result<DiscoveryOutcome, DiscoveryError> {
        let similarity = hit.similarity;
        let entry = self.bump(hit).await?;
        info!(request = %entry.request, similarity = ?similarity, "Reusing cached discovery answer");
        Ok(DiscoveryOutcome {
            answer: entry.answer.unwrap_or(entry.result_preview),
            provenance: Provenance::ReusedAnswer,
            solution: entry.solution,
            similarity,
        })
    }

    async fn reuse_solution(
        &self,
        hit: Hit,
        request: &str,
        intent: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let similarity = hit.similarity;
        let entry = self.bump(hit).await?;
        let Some(solution) = entry.solution else {
            return Err(DiscoveryError::no_suitable("cached solution has no descriptor"));
        };
        info!(service = %solution.service, operation = %solution.operation, similarity = ?similarity, "Re-executing cached solution");

        let answer = self.invoke(&solution).await?;
        self.cache_answer(request, intent, embedding, &solution, &answer).await?;
        Ok(DiscoveryOutcome {
            answer,
            provenance: Provenance::ReusedSolution,
            solution: Some(solution),
            similarity,
        })
    }

    async fn invoke(&self, solution: &SolutionDescriptor) -> Result<String, DiscoveryError> {
        let timeout = self.settings.invocation_timeout;
        let invocation = self
            .catalogue
            .invoke(&solution.service, &solution.operation, solution.arguments.clone());
        match tokio::time::timeout(timeout, invocation).await {
            Err(_) | Ok(Err(CapabilityError::Timeout { .. })) => Err(DiscoveryError::Timeout {
                stage: "invocation".into(),
                timeout_secs: timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(DiscoveryError::no_suitable(e.to_string())),
            Ok(Ok(chunks)) => Ok(chunks_to_text(&chunks)),
        }
    }

    async fn synthesize(
        &self,
        request: &str,
        intent: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let outcome = self.propose_and_invoke(request).await;

        let solution = match &outcome {
            Ok((solution, _)) => Some(solution.clone()),
            Err((solution, _)) => solution.clone(),
        };
        let mut entry = DiscoveryRecord::new(RecordKind::Solution, request, intent);
        entry.solution = solution;
        match &outcome {
            Ok((_, answer)) => {
                entry.success = true;
                entry.result_preview = preview(answer, self.settings.preview_chars);
            }
            Err((_, err)) => entry.result_preview = err.to_string(),
        }
        self.log(entry, embedding.clone()).await?;

        match outcome {
            Ok((solution, answer)) => {
                self.cache_answer(request, intent, embedding, &solution, &answer).await?;
                Ok(DiscoveryOutcome {
                    answer,
                    provenance: Provenance::Synthesized,
                    solution: Some(solution),
                    similarity: None,
                })
            }
            Err((_, err)) => Err(err),
        }
    }

    /// Handshake, proposal and invocation. Errors carry the proposed
    /// solution when one got that far.
    async fn propose_and_invoke(
        &self,
        request: &str,
    ) -> Result<(SolutionDescriptor, String), (Option<SolutionDescriptor>, DiscoveryError)> {
        let handshake = self.settings.handshake_timeout;
        let capabilities = match tokio::time::timeout(handshake, self.catalogue.list_capabilities()).await {
            Err(_) | Ok(Err(CapabilityError::Timeout { .. })) => {
                return Err((
                    None,
                    DiscoveryError::Timeout {
                        stage: "handshake".into(),
                        timeout_secs: handshake.as_secs(),
                    },
                ));
            }
            Ok(Err(e)) => return Err((None, DiscoveryError::no_suitable(e.to_string()))),
            Ok(Ok(caps)) if caps.is_empty() => {
                return Err((None, DiscoveryError::no_suitable("no capabilities are available")));
            }
            Ok(Ok(caps)) => caps,
        };

        let proposal_request = ProviderRequest::plain(self.model.clone(), build_messages(request, &capabilities), 0.0);
        let limit = self.settings.invocation_timeout;
        let reply = match tokio::time::timeout(limit, self.provider.complete(proposal_request)).await {
            Ok(Ok(response)) => response.message.content,
            Err(_) | Ok(Err(ProviderError::Timeout(_))) => {
                return Err((
                    None,
                    DiscoveryError::Timeout {
                        stage: "proposal".into(),
                        timeout_secs: limit.as_secs(),
                    },
                ));
            }
            Ok(Err(e)) => return Err((None, DiscoveryError::no_suitable(format!("proposal failed: {e}")))),
        };

        let solution = match parse_proposal(&reply) {
            Ok(Proposal::Call(solution)) => solution,
            Ok(Proposal::Decline(reason)) => return Err((None, DiscoveryError::no_suitable(reason))),
            Err(reason) => return Err((None, DiscoveryError::no_suitable(reason))),
        };

        let known = capabilities
            .iter()
            .any(|c| c.service == solution.service && c.name == solution.operation);
        if !known {
            let reason = format!("unknown capability {}/{}", solution.service, solution.operation);
            return Err((Some(solution), DiscoveryError::no_suitable(reason)));
        }

        match self.invoke(&solution).await {
            Ok(answer) => Ok((solution, answer)),
            Err(e) => Err((Some(solution), e)),
        }
    }

    async fn cache_answer(
        &self,
        request: &str,
        intent: Option<&str>,
        embedding: Option<Vec<f32>>,
        solution: &SolutionDescriptor,
        answer: &str,
    ) -> Result<(), MemoryError> {
        let mut entry = DiscoveryRecord::new(RecordKind::Answer, request, intent);
        entry.solution = Some(solution.clone());
        entry.result_preview = preview(answer, self.settings.preview_chars);
        entry.answer = Some(answer.to_string());
        entry.success = true;
        self.log(entry, embedding).await
    }

    async fn log(&self, entry: DiscoveryRecord, embedding: Option<Vec<f32>>) -> Result<(), MemoryError> {
        let value = serde_json::to_value(&entry)
            .map_err(|e| MemoryError::Storage(format!("Discovery record serialization: {e}")))?;
        self.store
            .put(
                MemoryRecord::new(Collection::Discovery, entry.key(), value)
                    .with_created_at(entry.created_at)
                    .with_embedding(embedding),
            )
            .await?;

        let (service, operation) = entry
            .solution
            .as_ref()
            .map(|s| (s.service.clone(), s.operation.clone()))
            .unwrap_or_default();
        debug!(kind = entry.kind.as_str(), success = entry.success, %service, %operation, "Discovery record logged");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::DiscoveryLogged {
                service,
                operation,
                success: entry.success,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Logged records, newest first.
    pub async fn records(&self, kind: RecordKind, limit: usize) -> Result<Vec<DiscoveryRecord>, MemoryError> {
        self.store
            .scan(
                Collection::Discovery,
                &RecordFilter::new().prefix(kind.key_prefix()).limit(limit),
            )
            .await?
            .iter()
            .map(|r| r.decode())
            .collect()
    }
}
