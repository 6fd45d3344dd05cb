//! Similarity ranking over graph entities.
//!
//! Read-only: ranks whole-entity snapshots and never blocks writers. The
//! score of a candidate is `cosine(query, embedding) * confidence`, so a
//! highly similar but poorly trusted item ranks below a slightly less similar
//! item the graph is confident about. Candidates whose similarity falls below
//! the caller's relevance threshold are cut before ranking; the effective
//! threshold (domain override or global) is resolved by the engine.

use rayon::prelude::*;

use crate::embed::{EMBED_DIM, cosine};
use crate::error::RankError;
use crate::knowledge::graph::KnowledgeGraph;
use crate::knowledge::{ConceptId, PatternId};

/// Default cap on returned hits.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// What kind of entity a hit refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Concept(ConceptId),
    Pattern(PatternId),
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: HitKind,
    pub name: String,
    /// Cosine similarity between the query and the entity embedding.
    pub similarity: f64,
    /// The entity's confidence at ranking time.
    pub confidence: f64,
    /// Final ranking score: similarity weighted by confidence.
    pub score: f64,
    /// Recency tiebreaker (last_updated / last_seen).
    pub updated_at: u64,
}

/// Confidence-weighted cosine ranker over the knowledge graph.
pub struct SimilarityRanker<'g> {
    graph: &'g KnowledgeGraph,
}

impl<'g> SimilarityRanker<'g> {
    pub fn new(graph: &'g KnowledgeGraph) -> Self {
        Self { graph }
    }

    /// Rank all concepts and patterns against a query embedding.
    ///
    /// Archived concepts and entities without a matching-dimension embedding
    /// are skipped. Results are capped at `limit` after the threshold cut.
    pub fn search(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RankError> {
        if query.is_empty() {
            return Err(RankError::EmptyQuery);
        }
        if query.len() != EMBED_DIM {
            return Err(RankError::DimensionMismatch {
                expected: EMBED_DIM,
                actual: query.len(),
            });
        }

        let concepts = self.graph.concepts_snapshot();
        let patterns = self.graph.patterns_snapshot();

        let mut hits: Vec<SearchHit> = concepts
            .par_iter()
            .filter_map(|c| {
                let hit = score(query, c.embedding.as_deref(), c.confidence, threshold)?;
                Some(SearchHit {
                    kind: HitKind::Concept(c.id),
                    name: c.name.clone(),
                    similarity: hit.0,
                    confidence: c.confidence,
                    score: hit.1,
                    updated_at: c.last_updated,
                })
            })
            .chain(patterns.par_iter().filter_map(|p| {
                let hit = score(query, p.embedding.as_deref(), p.confidence, threshold)?;
                Some(SearchHit {
                    kind: HitKind::Pattern(p.id),
                    name: p.name.clone(),
                    similarity: hit.0,
                    confidence: p.confidence,
                    score: hit.1,
                    updated_at: p.last_seen,
                })
            }))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(b.updated_at.cmp(&a.updated_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Rank against a free-text query using the built-in encoder.
    pub fn search_text(
        &self,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RankError> {
        if query.trim().is_empty() {
            return Err(RankError::EmptyQuery);
        }
        self.search(&crate::embed::embed_text(query), threshold, limit)
    }
}

/// Similarity and weighted score for one candidate, or `None` when it has no
/// usable embedding or falls below the threshold.
fn score(
    query: &[f32],
    embedding: Option<&[f32]>,
    confidence: f64,
    threshold: f64,
) -> Option<(f64, f64)> {
    let embedding = embedding?;
    if embedding.len() != query.len() {
        return None;
    }
    let similarity = cosine(query, embedding) as f64;
    if similarity < threshold {
        return None;
    }
    Some((similarity, similarity * confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::embed_text;
    use crate::knowledge::graph::GraphTuning;

    fn seeded_graph() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new(GraphTuning::default());
        kg.upsert_concept(
            "tokio",
            "asynchronous runtime for writing network applications",
            0.9,
            serde_json::Value::Null,
        )
        .unwrap();
        kg.upsert_concept(
            "serde",
            "serialization and deserialization framework",
            0.8,
            serde_json::Value::Null,
        )
        .unwrap();
        kg.upsert_pattern(
            "runtime-spawn",
            "spawn asynchronous tasks on the runtime",
            "",
            0.7,
            serde_json::Value::Null,
        )
        .unwrap();
        kg
    }

    #[test]
    fn empty_query_is_rejected() {
        let kg = seeded_graph();
        let ranker = SimilarityRanker::new(&kg);
        assert!(matches!(
            ranker.search_text("  ", 0.0, 10),
            Err(RankError::EmptyQuery)
        ));
        assert!(matches!(ranker.search(&[], 0.0, 10), Err(RankError::EmptyQuery)));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let kg = seeded_graph();
        let ranker = SimilarityRanker::new(&kg);
        let err = ranker.search(&[1.0; 7], 0.0, 10).unwrap_err();
        assert!(matches!(
            err,
            RankError::DimensionMismatch { expected: EMBED_DIM, actual: 7 }
        ));
    }

    #[test]
    fn relevant_entity_ranks_first() {
        let kg = seeded_graph();
        let ranker = SimilarityRanker::new(&kg);
        let hits = ranker
            .search_text("asynchronous runtime for network applications", 0.0, 10)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "tokio");
        assert!(hits[0].score <= hits[0].similarity, "confidence discounts the score");
    }

    #[test]
    fn threshold_cuts_low_similarity_candidates() {
        let kg = seeded_graph();
        let ranker = SimilarityRanker::new(&kg);
        let query = embed_text("asynchronous runtime for network applications");

        let open = ranker.search(&query, 0.0, 10).unwrap();
        let strict = ranker.search(&query, 0.99, 10).unwrap();
        assert!(strict.len() < open.len());
        assert!(strict.iter().all(|h| h.similarity >= 0.99));
    }

    #[test]
    fn limit_caps_results() {
        let kg = seeded_graph();
        let ranker = SimilarityRanker::new(&kg);
        let hits = ranker.search_text("runtime framework tasks", 0.0, 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn archived_concepts_are_skipped() {
        let kg = seeded_graph();
        let id = kg.concept_by_name("tokio").unwrap().id;
        kg.archive_concept(id).unwrap();

        let ranker = SimilarityRanker::new(&kg);
        let hits = ranker
            .search_text("asynchronous runtime for network applications", 0.0, 10)
            .unwrap();
        assert!(hits.iter().all(|h| h.kind != HitKind::Concept(id)));
    }

    #[test]
    fn equal_descriptions_rank_by_confidence() {
        let kg = KnowledgeGraph::new(GraphTuning::default());
        kg.upsert_concept("alpha", "connection pooling", 0.9, serde_json::Value::Null)
            .unwrap();
        kg.upsert_concept("beta", "connection pooling", 0.4, serde_json::Value::Null)
            .unwrap();

        let ranker = SimilarityRanker::new(&kg);
        let hits = ranker.search_text("connection pooling", 0.0, 10).unwrap();
        assert_eq!(hits[0].name, "alpha");
    }
}
