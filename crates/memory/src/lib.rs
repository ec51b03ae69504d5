//! Memory system for Steward.
//!
//! Two store backends (in-memory and SQLite) sit behind the `MemoryStore`
//! trait; the five memory managers and the disambiguation register are thin
//! typed layers over whichever store is configured.

pub mod disambiguation;
pub mod episodic;
pub mod in_memory;
pub mod procedural;
pub mod semantic;
pub mod shared;
pub mod sqlite;
pub mod vector;
pub mod working;

pub use disambiguation::{parse_selection, Candidate, DisambiguationError, DisambiguationRegister, DisambiguationSet};
pub use episodic::{ActionRecord, EpisodeFilter, EpisodicMemory, EpisodicNarrative, TimelineEntry};
pub use in_memory::InMemoryStore;
pub use procedural::{
    contains_phrase, normalize_trigger, rule_precedence, ExtractField, ProceduralMemory, Rule, Template, TemplateTask, Workflow,
    WorkflowMatch, WorkflowStep,
};
pub use semantic::{Preference, PreferenceSource, SemanticMemory};
pub use shared::{Handoff, HandoffStatus, SharedMemory};
pub use sqlite::SqliteStore;
pub use vector::{cosine_similarity, rank_by_similarity};
pub use working::{EntityRef, SessionContext, WorkingField, WorkingMemory, WorkingUpdate};

use chrono::Duration;
use std::sync::Arc;
use steward_core::embedding::Embedder;
use steward_core::memory::MemoryStore;

/// Every memory manager over one shared store.
pub struct MemorySystem {
    pub store: Arc<dyn MemoryStore>,
    pub working: WorkingMemory,
    pub episodic: EpisodicMemory,
    pub semantic: SemanticMemory,
    pub procedural: ProceduralMemory,
    pub shared: SharedMemory,
    pub disambiguation: DisambiguationRegister,
}

impl MemorySystem {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Option<Arc<dyn Embedder>>,
        working_ttl: Duration,
        handoff_ttl: Duration,
    ) -> Self {
        Self {
            working: WorkingMemory::new(store.clone(), working_ttl),
            episodic: EpisodicMemory::new(store.clone()).with_embedder(embedder.clone()),
            semantic: SemanticMemory::new(store.clone()),
            procedural: ProceduralMemory::new(store.clone()).with_embedder(embedder),
            shared: SharedMemory::new(store.clone(), handoff_ttl),
            // Pending selections live exactly as long as the session context
            disambiguation: DisambiguationRegister::new(store.clone(), working_ttl),
            store,
        }
    }

    /// An ephemeral system with default TTLs and no embedder.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            None,
            Duration::hours(2),
            Duration::minutes(5),
        )
    }
}
