//! Tool discovery cache for Steward.
//!
//! Requests that no static tool covers are routed to a dynamic capability
//! catalogue. Successful solutions and answers are remembered so that
//! similar requests are served again without asking the LLM.

pub mod cache;
pub mod error;
pub mod proposal;
pub mod record;

pub use cache::{DiscoveryOutcome, DiscoverySettings, Provenance, ToolDiscoveryCache};
pub use error::DiscoveryError;
pub use proposal::{Proposal, build_messages, parse_proposal};
pub use record::{DiscoveryRecord, RecordKind, SolutionDescriptor, fingerprint, normalize_request, preview};
