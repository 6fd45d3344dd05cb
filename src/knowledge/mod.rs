//! Knowledge data model: concepts, relationships, and patterns.
//!
//! The knowledge graph accumulates three entity kinds from research results:
//!
//! - [`Concept`] — a named unit of domain knowledge
//! - [`Relationship`] — a typed, evidence-backed edge between two concepts
//! - [`Pattern`] — a recurring template with a support count
//!
//! Every entity carries a confidence score in [0, 1] that is merged (never
//! overwritten) on repeat observation. Concepts are never hard-deleted; they
//! may only be archived.

pub mod graph;
pub mod lock;
pub mod similarity;

use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Unique, niche-optimized identifier for a concept.
///
/// Uses `NonZeroU64` so that `Option<ConceptId>` is the same size as
/// `ConceptId` (0 serves as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConceptId(pub(crate) NonZeroU64);

impl ConceptId {
    /// Create a `ConceptId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ConceptId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "concept:{}", self.0)
    }
}

/// Unique identifier for a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PatternId(pub(crate) NonZeroU64);

impl PatternId {
    /// Create a `PatternId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(PatternId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pattern:{}", self.0)
    }
}

/// Thread-safe entity id allocator.
///
/// Produces monotonically increasing ids starting from 1. Safe to share
/// across threads.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given id.
    ///
    /// Used when restoring state from persistent storage.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next raw id.
    pub fn next_raw(&self) -> GraphResult<NonZeroU64> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(raw).ok_or(GraphError::IdSpaceExhausted)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time in seconds since the UNIX epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A named unit of domain knowledge with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    /// Unique identifier.
    pub id: ConceptId,
    /// Human-readable name; the unique (case-insensitive) lookup key.
    pub name: String,
    /// Description of the concept.
    pub description: String,
    /// Belief strength in [0.0, 1.0].
    pub confidence: f64,
    /// When this concept was first observed (seconds since UNIX epoch).
    pub first_seen: u64,
    /// When this concept was last confidence-updated.
    pub last_updated: u64,
    /// Embedding for similarity ranking, if available.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata (tags, focus area, source hints).
    pub metadata: serde_json::Value,
    /// Archived concepts are excluded from ranking but never deleted.
    pub archived: bool,
}

/// A single piece of evidence supporting a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Reference to the source material (URL, document id).
    pub source_ref: String,
    /// Strength of this evidence in [0.0, 1.0].
    pub strength: f64,
    /// When the evidence was observed.
    pub timestamp: u64,
}

/// Lookup key for a relationship: the (source, target, type) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub source: ConceptId,
    pub target: ConceptId,
    pub rel_type: String,
}

impl std::fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rel:{}:{}:{}",
            self.source.get(),
            self.target.get(),
            self.rel_type
        )
    }
}

/// A typed, confidence-scored edge between two concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source concept (must exist when the relationship is created).
    pub source: ConceptId,
    /// Target concept (must exist when the relationship is created).
    pub target: ConceptId,
    /// Relationship type tag (e.g. "uses", "extends", "implements").
    pub rel_type: String,
    /// Belief strength in [0.0, 1.0]; merged on repeat observation.
    pub confidence: f64,
    /// Ordered evidence records, appended on every observation.
    pub evidence: Vec<EvidenceRecord>,
    /// When the relationship was first observed.
    pub created_at: u64,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

impl Relationship {
    /// The lookup key for this relationship.
    pub fn key(&self) -> RelationshipKey {
        RelationshipKey {
            source: self.source,
            target: self.target,
            rel_type: self.rel_type.clone(),
        }
    }
}

/// A recurring structural/behavioral template observed across research results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Unique identifier.
    pub id: PatternId,
    /// Pattern name.
    pub name: String,
    /// Template text; the basis for dedup similarity.
    pub template: String,
    /// Description of when the pattern applies.
    pub description: String,
    /// Number of corroborating observations; monotonically non-decreasing.
    pub support_count: u64,
    /// Belief strength in [0.0, 1.0].
    pub confidence: f64,
    /// When the pattern was first discovered.
    pub discovered_at: u64,
    /// When the pattern was last observed or used.
    pub last_seen: u64,
    /// Associated concepts (many-to-many).
    pub concepts: BTreeSet<ConceptId>,
    /// Embedding for similarity ranking, if available.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata (domain, language, usage counters).
    pub metadata: serde_json::Value,
}

impl Pattern {
    /// The domain this pattern was observed in, if recorded.
    pub fn domain(&self) -> Option<&str> {
        self.metadata.get("domain").and_then(|v| v.as_str())
    }
}

/// Change events emitted by graph mutations.
///
/// Consumed by the feedback loop to feed the optimizer's metrics aggregation.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A concept was created or confidence-merged.
    ConceptUpserted {
        id: ConceptId,
        observed: f64,
        merged: f64,
        created: bool,
    },
    /// A relationship was created or confidence-merged.
    RelationshipUpserted {
        key: RelationshipKey,
        observed: f64,
        merged: f64,
        created: bool,
    },
    /// A pattern was created or merged into an existing one.
    PatternUpserted {
        id: PatternId,
        observed: f64,
        merged: f64,
        created: bool,
        support_count: u64,
    },
    /// A pattern merge proceeded despite confidences disagreeing beyond the
    /// divergence bound. Flagged for external review; evidence is never dropped.
    DivergentMerge {
        id: PatternId,
        existing: f64,
        observed: f64,
        divergence: f64,
    },
}

/// Filter for pattern queries.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    /// Only patterns observed in this domain.
    pub domain: Option<String>,
    /// Only patterns at or above this confidence.
    pub min_confidence: Option<f64>,
    /// Only patterns associated with this concept.
    pub concept: Option<ConceptId>,
}
