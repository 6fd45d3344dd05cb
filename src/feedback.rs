//! The feedback loop: the one place where research results and user feedback
//! flow into both the knowledge graph and the parameter optimizer.
//!
//! `record_result` ingests an extraction into the graph and folds the
//! resulting change events into the optimizer's quality metrics;
//! `record_feedback` appends a user judgment. Both count one optimization
//! step and run the optimizer when its trigger fires, so parameter tuning
//! happens inline with normal operation rather than on a background schedule.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GraphError, SeshatResult};
use crate::knowledge::graph::KnowledgeGraph;
use crate::knowledge::{ConceptId, EvidenceRecord, GraphEvent, now_secs};
use crate::params::optimizer::{ParameterOptimizer, Snapshot};
use crate::research::ResearchResult;

/// Summary of one ingested research result.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub concepts_created: usize,
    pub concepts_merged: usize,
    pub relationships_upserted: usize,
    pub patterns_created: usize,
    pub patterns_merged: usize,
    /// Pattern merges whose confidences disagreed beyond the divergence bound.
    pub divergent_merges: usize,
    /// Present when this ingest triggered an optimization run.
    pub optimization: Option<Snapshot>,
}

/// Couples the knowledge graph with the parameter optimizer.
pub struct FeedbackLoop {
    graph: Arc<KnowledgeGraph>,
    params: Arc<ParameterOptimizer>,
}

impl FeedbackLoop {
    pub fn new(graph: Arc<KnowledgeGraph>, params: Arc<ParameterOptimizer>) -> Self {
        Self { graph, params }
    }

    /// Ingest one research result.
    ///
    /// The result is validated as a whole before any mutation. Concepts land
    /// first so that relationship endpoints can resolve against them;
    /// relationship endpoint names that resolve to nothing fail before any
    /// relationship is written.
    pub fn record_result(&self, result: &ResearchResult) -> SeshatResult<IngestReport> {
        result.validate().map_err(crate::error::SeshatError::Graph)?;
        let mut report = IngestReport::default();

        let mut ingested: HashMap<String, ConceptId> = HashMap::new();
        for obs in &result.extraction.concepts {
            let concept = self.graph.upsert_concept(
                &obs.name,
                &obs.description,
                obs.confidence,
                obs.metadata.clone(),
            )?;
            ingested.insert(obs.name.trim().to_lowercase(), concept.id);
        }

        // Resolve every endpoint before writing any relationship, so a bad
        // reference cannot leave a half-ingested relationship set behind.
        let mut endpoints: Vec<(ConceptId, ConceptId)> = Vec::new();
        for rel in &result.extraction.relationships {
            let source = self.resolve(&ingested, &rel.source)?;
            let target = self.resolve(&ingested, &rel.target)?;
            endpoints.push((source, target));
        }
        for (rel, (source, target)) in result.extraction.relationships.iter().zip(endpoints) {
            let evidence = EvidenceRecord {
                source_ref: result.source_ref.clone(),
                strength: rel.evidence_strength.unwrap_or(rel.confidence),
                timestamp: now_secs(),
            };
            self.graph
                .upsert_relationship(source, target, &rel.rel_type, vec![evidence], rel.confidence)?;
        }

        for obs in &result.extraction.patterns {
            let mut metadata = obs.metadata.clone();
            if let Some(domain) = &result.domain {
                match &mut metadata {
                    serde_json::Value::Object(map) => {
                        map.entry("domain")
                            .or_insert_with(|| serde_json::json!(domain));
                    }
                    serde_json::Value::Null => metadata = serde_json::json!({ "domain": domain }),
                    _ => {}
                }
            }
            let pattern = self.graph.upsert_pattern(
                &obs.name,
                &obs.template,
                &obs.description,
                obs.confidence,
                metadata,
            )?;
            for name in &obs.concepts {
                let concept_id = self.resolve(&ingested, name)?;
                self.graph.associate(pattern.id, concept_id)?;
            }
        }

        // Fold what just happened into the optimizer's quality window.
        for event in self.graph.drain_events() {
            match event {
                GraphEvent::ConceptUpserted { observed, created, .. } => {
                    self.params.observe_quality(observed)?;
                    if created {
                        report.concepts_created += 1;
                    } else {
                        report.concepts_merged += 1;
                    }
                }
                GraphEvent::RelationshipUpserted { observed, .. } => {
                    self.params.observe_quality(observed)?;
                    report.relationships_upserted += 1;
                }
                GraphEvent::PatternUpserted { observed, created, .. } => {
                    self.params.observe_quality(observed)?;
                    if created {
                        report.patterns_created += 1;
                    } else {
                        report.patterns_merged += 1;
                    }
                }
                GraphEvent::DivergentMerge { .. } => report.divergent_merges += 1,
            }
        }

        report.optimization = self.params.advance_step()?;
        tracing::debug!(
            concepts = report.concepts_created + report.concepts_merged,
            relationships = report.relationships_upserted,
            patterns = report.patterns_created + report.patterns_merged,
            optimized = report.optimization.is_some(),
            "research result ingested"
        );
        Ok(report)
    }

    /// Record a user judgment about a query outcome.
    ///
    /// Returns the optimization snapshot when this feedback tipped the
    /// trigger.
    pub fn record_feedback(
        &self,
        query_id: &str,
        accepted: bool,
        relevance: f64,
    ) -> SeshatResult<Option<Snapshot>> {
        self.params.record_feedback(query_id, accepted, relevance)?;
        Ok(self.params.advance_step()?)
    }

    fn resolve(
        &self,
        ingested: &HashMap<String, ConceptId>,
        name: &str,
    ) -> Result<ConceptId, GraphError> {
        let key = name.trim().to_lowercase();
        if let Some(id) = ingested.get(&key) {
            return Ok(*id);
        }
        self.graph
            .concept_by_name(name)
            .map(|c| c.id)
            .ok_or_else(|| GraphError::ConceptNameNotFound { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::graph::GraphTuning;
    use crate::params::ParameterCatalog;
    use crate::research::{
        ConceptObservation, Extraction, PatternObservation, RelationshipObservation,
    };

    fn feedback_loop() -> FeedbackLoop {
        FeedbackLoop::new(
            Arc::new(KnowledgeGraph::new(GraphTuning::default())),
            Arc::new(ParameterOptimizer::new(ParameterCatalog::default())),
        )
    }

    fn result_with(extraction: Extraction) -> ResearchResult {
        ResearchResult {
            query: "rust async patterns".into(),
            source_ref: "https://example.com/article".into(),
            domain: Some("rust".into()),
            source_quality: 0.8,
            extraction,
        }
    }

    #[test]
    fn ingest_creates_all_entity_kinds() {
        let fl = feedback_loop();
        let report = fl
            .record_result(&result_with(Extraction {
                concepts: vec![
                    ConceptObservation {
                        name: "tokio".into(),
                        description: "async runtime".into(),
                        confidence: 0.8,
                        metadata: serde_json::Value::Null,
                    },
                    ConceptObservation {
                        name: "hyper".into(),
                        description: "http library".into(),
                        confidence: 0.7,
                        metadata: serde_json::Value::Null,
                    },
                ],
                relationships: vec![RelationshipObservation {
                    source: "hyper".into(),
                    target: "tokio".into(),
                    rel_type: "uses".into(),
                    confidence: 0.9,
                    evidence_strength: None,
                }],
                patterns: vec![PatternObservation {
                    name: "spawn-per-conn".into(),
                    template: "spawn one task per accepted connection".into(),
                    description: String::new(),
                    confidence: 0.6,
                    concepts: vec!["tokio".into()],
                    metadata: serde_json::Value::Null,
                }],
            }))
            .unwrap();

        assert_eq!(report.concepts_created, 2);
        assert_eq!(report.relationships_upserted, 1);
        assert_eq!(report.patterns_created, 1);
        assert!(report.optimization.is_none(), "no feedback yet");

        let pattern = &fl.graph.patterns_snapshot()[0];
        assert_eq!(pattern.domain(), Some("rust"), "domain tag applied");
        assert_eq!(pattern.concepts.len(), 1);
    }

    #[test]
    fn unresolvable_endpoint_fails_before_relationship_writes() {
        let fl = feedback_loop();
        let err = fl.record_result(&result_with(Extraction {
            concepts: vec![ConceptObservation {
                name: "tokio".into(),
                description: String::new(),
                confidence: 0.8,
                metadata: serde_json::Value::Null,
            }],
            relationships: vec![
                RelationshipObservation {
                    source: "tokio".into(),
                    target: "ghost".into(),
                    rel_type: "uses".into(),
                    confidence: 0.9,
                    evidence_strength: None,
                },
            ],
            patterns: vec![],
        }));
        assert!(err.is_err());
        assert_eq!(fl.graph.relationship_count(), 0);
    }

    #[test]
    fn invalid_result_rejected_whole() {
        let fl = feedback_loop();
        let err = fl.record_result(&result_with(Extraction {
            concepts: vec![ConceptObservation {
                name: "tokio".into(),
                description: String::new(),
                confidence: 1.5,
                metadata: serde_json::Value::Null,
            }],
            ..Default::default()
        }));
        assert!(err.is_err());
        assert_eq!(fl.graph.concept_count(), 0, "validation precedes mutation");
    }

    #[test]
    fn repeat_ingest_merges_instead_of_duplicating() {
        let fl = feedback_loop();
        let extraction = Extraction {
            concepts: vec![ConceptObservation {
                name: "tokio".into(),
                description: String::new(),
                confidence: 0.8,
                metadata: serde_json::Value::Null,
            }],
            ..Default::default()
        };
        fl.record_result(&result_with(extraction.clone())).unwrap();
        let report = fl.record_result(&result_with(extraction)).unwrap();

        assert_eq!(report.concepts_created, 0);
        assert_eq!(report.concepts_merged, 1);
        assert_eq!(fl.graph.concept_count(), 1);
    }

    #[test]
    fn ingested_confidences_feed_quality_metrics() {
        let fl = feedback_loop();
        fl.record_result(&result_with(Extraction {
            concepts: vec![ConceptObservation {
                name: "tokio".into(),
                description: String::new(),
                confidence: 0.8,
                metadata: serde_json::Value::Null,
            }],
            ..Default::default()
        }))
        .unwrap();

        let metrics = fl.params.current_snapshot().metrics;
        assert_eq!(metrics.avg_quality, Some(0.8));
        assert_eq!(metrics.steps, 1, "each ingest counts one step");
    }

    #[test]
    fn feedback_alone_triggers_optimization() {
        let fl = feedback_loop();
        fl.params.set_value("base_confidence", 0.6).unwrap();

        let mut snapshot = None;
        for i in 0..5 {
            snapshot = fl.record_feedback(&format!("q{i}"), true, 0.9).unwrap();
        }
        let snapshot = snapshot.expect("fifth feedback fires the trigger");
        assert_eq!(snapshot.run, 1);
        assert!((fl.params.value_of("base_confidence").unwrap() - 0.63).abs() < 1e-12);
    }

    #[test]
    fn divergent_merges_are_counted() {
        let fl = feedback_loop();
        let observation = |confidence| PatternObservation {
            name: "p".into(),
            template: "retry the request with exponential backoff".into(),
            description: String::new(),
            confidence,
            concepts: vec![],
            metadata: serde_json::Value::Null,
        };
        fl.record_result(&result_with(Extraction {
            patterns: vec![observation(0.95)],
            ..Default::default()
        }))
        .unwrap();
        let report = fl
            .record_result(&result_with(Extraction {
                patterns: vec![observation(0.1)],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(report.patterns_merged, 1);
        assert_eq!(report.divergent_merges, 1);
    }
}
