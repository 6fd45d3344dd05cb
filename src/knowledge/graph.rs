//! The knowledge graph: concept, relationship, and pattern store.
//!
//! Entities live in concurrent maps (DashMap) with a petgraph topology over
//! relationship edges for traversal queries. Mutations on the same entity key
//! serialize through the [`LockArena`]; mutations on disjoint keys run in
//! parallel. Readers always observe whole-entity snapshots because an update
//! replaces the entire entry under its lock.
//!
//! Durability: when a store is attached, every mutation commits the new
//! entity state before it becomes visible in memory or is acknowledged to the
//! caller.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::confidence;
use crate::embed;
use crate::knowledge::lock::LockArena;
use crate::knowledge::similarity::{DEFAULT_MERGE_THRESHOLD, template_similarity};
use crate::knowledge::{
    Concept, ConceptId, EvidenceRecord, GraphEvent, GraphResult, IdAllocator, Pattern,
    PatternFilter, PatternId, Relationship, RelationshipKey, now_secs,
};
use crate::store::durable::DurableStore;
use crate::store::{encode, keys};
use crate::error::GraphError;

/// All pattern mutations serialize on this arena key: the merge target is
/// chosen by a similarity scan, so there is no stable per-entity key to lock
/// before the scan completes.
const PATTERN_NAMESPACE: &str = "patterns";

/// Tunables for graph behavior that are fixed at startup (as opposed to the
/// online-tuned parameters owned by the optimizer).
#[derive(Debug, Clone)]
pub struct GraphTuning {
    /// Template similarity at or above which two patterns merge.
    pub merge_threshold: f64,
    /// Confidence disagreement beyond which a pattern merge is flagged.
    pub divergence_bound: f64,
    /// EMA learning rate for confidence merges (the quality factor).
    pub quality_learning_rate: f64,
    /// Bounded wait for a single entity lock.
    pub lock_timeout: Duration,
}

impl Default for GraphTuning {
    fn default() -> Self {
        Self {
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            divergence_bound: 0.4,
            quality_learning_rate: 0.1,
            lock_timeout: Duration::from_millis(250),
        }
    }
}

/// Aggregate confidence means across the graph, for dashboards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceMetrics {
    pub pattern_confidence: f64,
    pub relationship_confidence: f64,
    pub overall_confidence: f64,
}

/// Confidence-weighted knowledge graph.
pub struct KnowledgeGraph {
    tuning: GraphTuning,
    concepts: DashMap<ConceptId, Concept>,
    /// Lowercased name → concept id.
    names: DashMap<String, ConceptId>,
    relationships: DashMap<RelationshipKey, Relationship>,
    patterns: DashMap<PatternId, Pattern>,
    /// Relationship topology for traversal queries; edges carry the type tag.
    topology: RwLock<DiGraph<ConceptId, String>>,
    node_index: DashMap<ConceptId, NodeIndex>,
    locks: LockArena,
    events: Mutex<Vec<GraphEvent>>,
    concept_ids: IdAllocator,
    pattern_ids: IdAllocator,
    store: Option<Arc<DurableStore>>,
}

impl KnowledgeGraph {
    /// Create an empty, memory-only graph.
    pub fn new(tuning: GraphTuning) -> Self {
        let lock_timeout = tuning.lock_timeout;
        Self {
            tuning,
            concepts: DashMap::new(),
            names: DashMap::new(),
            relationships: DashMap::new(),
            patterns: DashMap::new(),
            topology: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
            locks: LockArena::new(lock_timeout),
            events: Mutex::new(Vec::new()),
            concept_ids: IdAllocator::new(),
            pattern_ids: IdAllocator::new(),
            store: None,
        }
    }

    /// Open a graph backed by a durable store, restoring any persisted entities.
    pub fn with_store(tuning: GraphTuning, store: Arc<DurableStore>) -> GraphResult<Self> {
        let graph = Self::new(tuning);

        let mut max_concept = 0;
        for (_, bytes) in store.scan_prefix(keys::CONCEPT_PREFIX)? {
            let concept: Concept = crate::store::decode(&bytes)?;
            max_concept = max_concept.max(concept.id.get());
            graph.names.insert(normalize(&concept.name), concept.id);
            graph.ensure_node(concept.id);
            graph.concepts.insert(concept.id, concept);
        }

        for (_, bytes) in store.scan_prefix(keys::RELATIONSHIP_PREFIX)? {
            let rel: Relationship = crate::store::decode(&bytes)?;
            graph.add_topology_edge(rel.source, rel.target, &rel.rel_type);
            graph.relationships.insert(rel.key(), rel);
        }

        let mut max_pattern = 0;
        for (_, bytes) in store.scan_prefix(keys::PATTERN_PREFIX)? {
            let pattern: Pattern = crate::store::decode(&bytes)?;
            max_pattern = max_pattern.max(pattern.id.get());
            graph.patterns.insert(pattern.id, pattern);
        }

        tracing::info!(
            concepts = graph.concepts.len(),
            relationships = graph.relationships.len(),
            patterns = graph.patterns.len(),
            "knowledge graph restored from store"
        );

        Ok(Self {
            concept_ids: IdAllocator::starting_from(max_concept + 1),
            pattern_ids: IdAllocator::starting_from(max_pattern + 1),
            store: Some(store),
            ..graph
        })
    }

    // -----------------------------------------------------------------------
    // Concepts
    // -----------------------------------------------------------------------

    /// Create a concept or merge new evidence into an existing one (by name).
    pub fn upsert_concept(
        &self,
        name: &str,
        description: &str,
        observed_confidence: f64,
        metadata: serde_json::Value,
    ) -> GraphResult<Concept> {
        if name.trim().is_empty() {
            return Err(GraphError::MissingField {
                field: "name".into(),
                context: "concept".into(),
            });
        }
        confidence::validate_unit(observed_confidence, "concept confidence")?;

        let norm = normalize(name);
        let _guard = self.locks.acquire(&format!("concept:{norm}"))?;

        if let Some(id) = self.names.get(&norm).map(|e| *e.value()) {
            // Existing concept: EMA-merge, never overwrite.
            let mut concept = self
                .concepts
                .get(&id)
                .map(|e| e.value().clone())
                .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
            let old = concept.confidence;
            concept.confidence = confidence::merge(
                old,
                observed_confidence,
                self.tuning.quality_learning_rate,
            );
            concept.last_updated = now_secs();
            if concept.description.is_empty() && !description.is_empty() {
                concept.description = description.to_string();
            }
            merge_metadata(&mut concept.metadata, &metadata);

            self.persist_concept(&concept)?;
            self.concepts.insert(id, concept.clone());
            self.push_event(GraphEvent::ConceptUpserted {
                id,
                observed: observed_confidence,
                merged: concept.confidence,
                created: false,
            });
            tracing::debug!(%id, old, new = concept.confidence, "concept confidence merged");
            return Ok(concept);
        }

        // First mention: initialize directly from the observed signal.
        let id = ConceptId(self.concept_ids.next_raw()?);
        let now = now_secs();
        let concept = Concept {
            id,
            name: name.trim().to_string(),
            description: description.to_string(),
            confidence: observed_confidence,
            first_seen: now,
            last_updated: now,
            embedding: Some(embed::embed_text(&format!("{name} {description}"))),
            metadata,
            archived: false,
        };

        self.persist_concept(&concept)?;
        self.names.insert(norm, id);
        self.ensure_node(id);
        self.concepts.insert(id, concept.clone());
        self.push_event(GraphEvent::ConceptUpserted {
            id,
            observed: observed_confidence,
            merged: observed_confidence,
            created: true,
        });
        tracing::info!(%id, name = concept.name, "concept created");
        Ok(concept)
    }

    /// Look up a concept by id.
    pub fn concept(&self, id: ConceptId) -> Option<Concept> {
        self.concepts.get(&id).map(|e| e.value().clone())
    }

    /// Look up a concept by (case-insensitive) name.
    pub fn concept_by_name(&self, name: &str) -> Option<Concept> {
        let id = *self.names.get(&normalize(name))?.value();
        self.concept(id)
    }

    /// Archive a concept. Archived concepts are excluded from ranking but
    /// remain in the graph; concepts are never hard-deleted.
    pub fn archive_concept(&self, id: ConceptId) -> GraphResult<Concept> {
        let name = self
            .concepts
            .get(&id)
            .map(|e| e.value().name.clone())
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
        let _guard = self.locks.acquire(&format!("concept:{}", normalize(&name)))?;

        let mut concept = self
            .concepts
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
        concept.archived = true;
        concept.last_updated = now_secs();
        self.persist_concept(&concept)?;
        self.concepts.insert(id, concept.clone());
        Ok(concept)
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    /// Create a relationship or merge new evidence into an existing one.
    ///
    /// Both endpoint concepts must already exist; otherwise this fails with
    /// [`GraphError::ConceptNotFound`] and the graph is left unmodified.
    pub fn upsert_relationship(
        &self,
        source: ConceptId,
        target: ConceptId,
        rel_type: &str,
        evidence: Vec<EvidenceRecord>,
        observed_confidence: f64,
    ) -> GraphResult<Relationship> {
        if rel_type.trim().is_empty() {
            return Err(GraphError::MissingField {
                field: "rel_type".into(),
                context: "relationship".into(),
            });
        }
        confidence::validate_unit(observed_confidence, "relationship confidence")?;
        for record in &evidence {
            confidence::validate_unit(record.strength, "evidence strength")?;
        }
        if !self.concepts.contains_key(&source) {
            return Err(GraphError::ConceptNotFound { id: source.get() });
        }
        if !self.concepts.contains_key(&target) {
            return Err(GraphError::ConceptNotFound { id: target.get() });
        }

        let key = RelationshipKey {
            source,
            target,
            rel_type: rel_type.to_string(),
        };
        let _guard = self.locks.acquire(&key.to_string())?;

        if let Some(existing) = self.relationships.get(&key).map(|e| e.value().clone()) {
            let mut rel = existing;
            rel.confidence = confidence::merge(
                rel.confidence,
                observed_confidence,
                self.tuning.quality_learning_rate,
            );
            rel.evidence.extend(evidence);

            self.persist_relationship(&rel)?;
            self.relationships.insert(key.clone(), rel.clone());
            self.push_event(GraphEvent::RelationshipUpserted {
                key,
                observed: observed_confidence,
                merged: rel.confidence,
                created: false,
            });
            return Ok(rel);
        }

        let rel = Relationship {
            source,
            target,
            rel_type: rel_type.to_string(),
            confidence: observed_confidence,
            evidence,
            created_at: now_secs(),
            metadata: serde_json::Value::Null,
        };

        self.persist_relationship(&rel)?;
        self.add_topology_edge(source, target, rel_type);
        self.relationships.insert(key.clone(), rel.clone());
        self.push_event(GraphEvent::RelationshipUpserted {
            key,
            observed: observed_confidence,
            merged: observed_confidence,
            created: true,
        });
        Ok(rel)
    }

    /// Look up a relationship by its (source, target, type) key.
    pub fn relationship(&self, key: &RelationshipKey) -> Option<Relationship> {
        self.relationships.get(key).map(|e| e.value().clone())
    }

    /// Concepts reachable from `start` within `depth` relationship hops.
    ///
    /// When `rel_type` is given, only edges with that type are followed.
    pub fn related_concepts(
        &self,
        start: ConceptId,
        rel_type: Option<&str>,
        depth: usize,
    ) -> GraphResult<Vec<Concept>> {
        if !self.concepts.contains_key(&start) {
            return Err(GraphError::ConceptNotFound { id: start.get() });
        }

        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        let mut current = vec![start];
        let mut seen = std::collections::HashSet::from([start]);
        let mut related = Vec::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for &id in &current {
                let Some(idx) = self.node_index.get(&id).map(|e| *e.value()) else {
                    continue;
                };
                for edge in topology.edges_directed(idx, Direction::Outgoing) {
                    if rel_type.is_some_and(|t| edge.weight().as_str() != t) {
                        continue;
                    }
                    if let Some(&neighbor) = topology.node_weight(edge.target()) {
                        if seen.insert(neighbor) {
                            next.push(neighbor);
                            related.push(neighbor);
                        }
                    }
                }
            }
            current = next;
        }
        drop(topology);

        Ok(related.into_iter().filter_map(|id| self.concept(id)).collect())
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    /// Create a pattern, or merge into the most similar existing pattern when
    /// template similarity reaches the merge threshold.
    ///
    /// A merge between strongly disagreeing confidences still proceeds (the
    /// evidence is never dropped) but emits a [`GraphEvent::DivergentMerge`]
    /// for external review.
    pub fn upsert_pattern(
        &self,
        name: &str,
        template: &str,
        description: &str,
        observed_confidence: f64,
        metadata: serde_json::Value,
    ) -> GraphResult<Pattern> {
        if template.trim().is_empty() {
            return Err(GraphError::MissingField {
                field: "template".into(),
                context: "pattern".into(),
            });
        }
        confidence::validate_unit(observed_confidence, "pattern confidence")?;

        let _guard = self.locks.acquire(PATTERN_NAMESPACE)?;

        // Deterministic best-match scan over existing templates.
        let best = self
            .patterns
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    template_similarity(template, &entry.value().template),
                )
            })
            .max_by(|(a_id, a_sim), (b_id, b_sim)| {
                a_sim.total_cmp(b_sim).then(b_id.cmp(a_id))
            });

        if let Some((id, sim)) = best {
            if sim >= self.tuning.merge_threshold {
                let mut pattern = self
                    .patterns
                    .get(&id)
                    .map(|e| e.value().clone())
                    .ok_or(GraphError::PatternNotFound { id: id.get() })?;

                let existing = pattern.confidence;
                let gap = confidence::divergence(existing, observed_confidence);
                pattern.support_count += 1;
                pattern.confidence = confidence::merge(
                    existing,
                    observed_confidence,
                    self.tuning.quality_learning_rate,
                );
                pattern.last_seen = now_secs();
                merge_metadata(&mut pattern.metadata, &metadata);

                self.persist_pattern(&pattern)?;
                self.patterns.insert(id, pattern.clone());
                self.push_event(GraphEvent::PatternUpserted {
                    id,
                    observed: observed_confidence,
                    merged: pattern.confidence,
                    created: false,
                    support_count: pattern.support_count,
                });
                if gap > self.tuning.divergence_bound {
                    tracing::warn!(
                        %id,
                        existing,
                        observed = observed_confidence,
                        divergence = gap,
                        "divergent pattern merge flagged for review"
                    );
                    self.push_event(GraphEvent::DivergentMerge {
                        id,
                        existing,
                        observed: observed_confidence,
                        divergence: gap,
                    });
                }
                return Ok(pattern);
            }
        }

        let id = PatternId(self.pattern_ids.next_raw()?);
        let now = now_secs();
        let pattern = Pattern {
            id,
            name: name.trim().to_string(),
            template: template.to_string(),
            description: description.to_string(),
            support_count: 1,
            confidence: observed_confidence,
            discovered_at: now,
            last_seen: now,
            concepts: Default::default(),
            embedding: Some(embed::embed_text(template)),
            metadata,
        };

        self.persist_pattern(&pattern)?;
        self.patterns.insert(id, pattern.clone());
        self.push_event(GraphEvent::PatternUpserted {
            id,
            observed: observed_confidence,
            merged: observed_confidence,
            created: true,
            support_count: 1,
        });
        tracing::info!(%id, name = pattern.name, "pattern created");
        Ok(pattern)
    }

    /// Idempotently associate a pattern with a concept.
    pub fn associate(&self, pattern_id: PatternId, concept_id: ConceptId) -> GraphResult<()> {
        if !self.concepts.contains_key(&concept_id) {
            return Err(GraphError::ConceptNotFound { id: concept_id.get() });
        }
        let _guard = self.locks.acquire(PATTERN_NAMESPACE)?;

        let mut pattern = self
            .patterns
            .get(&pattern_id)
            .map(|e| e.value().clone())
            .ok_or(GraphError::PatternNotFound { id: pattern_id.get() })?;
        if !pattern.concepts.insert(concept_id) {
            return Ok(()); // already linked
        }
        self.persist_pattern(&pattern)?;
        self.patterns.insert(pattern_id, pattern);
        Ok(())
    }

    /// Record a usage of a pattern: bumps last_seen and a usage counter.
    pub fn record_usage(
        &self,
        pattern_id: PatternId,
        context: serde_json::Value,
    ) -> GraphResult<()> {
        let _guard = self.locks.acquire(PATTERN_NAMESPACE)?;

        let mut pattern = self
            .patterns
            .get(&pattern_id)
            .map(|e| e.value().clone())
            .ok_or(GraphError::PatternNotFound { id: pattern_id.get() })?;
        pattern.last_seen = now_secs();

        let count = pattern
            .metadata
            .get("usage_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        merge_metadata(
            &mut pattern.metadata,
            &serde_json::json!({ "usage_count": count + 1, "last_usage": context }),
        );

        self.persist_pattern(&pattern)?;
        self.patterns.insert(pattern_id, pattern);
        Ok(())
    }

    /// Look up a pattern by id.
    pub fn pattern(&self, id: PatternId) -> Option<Pattern> {
        self.patterns.get(&id).map(|e| e.value().clone())
    }

    /// Query patterns, ordered by (confidence desc, support_count desc).
    pub fn query_patterns(&self, filter: &PatternFilter) -> Vec<Pattern> {
        let mut matches: Vec<Pattern> = self
            .patterns
            .iter()
            .map(|e| e.value().clone())
            .filter(|p| {
                filter
                    .domain
                    .as_deref()
                    .is_none_or(|d| p.domain() == Some(d))
                    && filter.min_confidence.is_none_or(|min| p.confidence >= min)
                    && filter.concept.is_none_or(|c| p.concepts.contains(&c))
            })
            .collect();
        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.support_count.cmp(&a.support_count))
        });
        matches
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Drain accumulated change events.
    pub fn drain_events(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Aggregate confidence means across patterns and relationships.
    pub fn confidence_metrics(&self) -> ConfidenceMetrics {
        let pattern_confidence = mean(self.patterns.iter().map(|e| e.value().confidence));
        let relationship_confidence =
            mean(self.relationships.iter().map(|e| e.value().confidence));
        ConfidenceMetrics {
            pattern_confidence,
            relationship_confidence,
            overall_confidence: (pattern_confidence + relationship_confidence) / 2.0,
        }
    }

    /// Snapshot of all non-archived concepts.
    pub fn concepts_snapshot(&self) -> Vec<Concept> {
        self.concepts
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| !c.archived)
            .collect()
    }

    /// Snapshot of all patterns.
    pub fn patterns_snapshot(&self) -> Vec<Pattern> {
        self.patterns.iter().map(|e| e.value().clone()).collect()
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_node(&self, id: ConceptId) -> NodeIndex {
        if let Some(idx) = self.node_index.get(&id) {
            return *idx.value();
        }
        let mut topology = self.topology.write().unwrap_or_else(|e| e.into_inner());
        if let Some(idx) = self.node_index.get(&id) {
            return *idx.value();
        }
        let idx = topology.add_node(id);
        self.node_index.insert(id, idx);
        idx
    }

    fn add_topology_edge(&self, source: ConceptId, target: ConceptId, rel_type: &str) {
        let src = self.ensure_node(source);
        let dst = self.ensure_node(target);
        let mut topology = self.topology.write().unwrap_or_else(|e| e.into_inner());
        topology.add_edge(src, dst, rel_type.to_string());
    }

    fn push_event(&self, event: GraphEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn persist_concept(&self, concept: &Concept) -> GraphResult<()> {
        if let Some(store) = &self.store {
            store.put(&keys::concept(concept.id), &encode(concept)?)?;
        }
        Ok(())
    }

    fn persist_relationship(&self, rel: &Relationship) -> GraphResult<()> {
        if let Some(store) = &self.store {
            store.put(&keys::relationship(&rel.key()), &encode(rel)?)?;
        }
        Ok(())
    }

    fn persist_pattern(&self, pattern: &Pattern) -> GraphResult<()> {
        if let Some(store) = &self.store {
            store.put(&keys::pattern(pattern.id), &encode(pattern)?)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KnowledgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraph")
            .field("concepts", &self.concepts.len())
            .field("relationships", &self.relationships.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Overlay incoming metadata keys onto existing metadata.
///
/// Non-object incoming values other than null replace the existing value.
fn merge_metadata(existing: &mut serde_json::Value, incoming: &serde_json::Value) {
    match (existing, incoming) {
        (_, serde_json::Value::Null) => {}
        (serde_json::Value::Object(dst), serde_json::Value::Object(src)) => {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}
