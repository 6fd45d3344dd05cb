//! The engine facade: owns every subsystem and wires them together.
//!
//! Construction is the init lifecycle: open the durable store (when a data
//! directory is configured), restore the graph and parameter state from it,
//! and couple them through the feedback loop. All public operations go
//! through this type; the subsystems stay usable on their own for tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, SeshatResult};
use crate::feedback::{FeedbackLoop, IngestReport};
use crate::knowledge::graph::{ConfidenceMetrics, GraphTuning, KnowledgeGraph};
use crate::params::ParameterCatalog;
use crate::params::optimizer::{ParameterOptimizer, Snapshot};
use crate::rank::{DEFAULT_SEARCH_LIMIT, SearchHit, SimilarityRanker};
use crate::research::ResearchResult;
use crate::store::durable::DurableStore;

/// Startup-fixed graph tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Template similarity at or above which patterns merge.
    pub merge_threshold: f64,
    /// Confidence disagreement beyond which a merge is flagged.
    pub divergence_bound: f64,
    /// Bounded wait for entity locks, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.85,
            divergence_bound: 0.4,
            lock_timeout_ms: 250,
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for persistent storage. `None` runs memory-only.
    pub data_dir: Option<PathBuf>,
    /// Parameter catalog TOML; built-in defaults when absent.
    pub catalog_path: Option<PathBuf>,
    pub tuning: TuningConfig,
}

/// Summary counts for the `info` surface.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub concepts: usize,
    pub relationships: usize,
    pub patterns: usize,
    pub optimization_runs: u64,
    pub confidence: ConfidenceMetrics,
    pub data_dir: Option<PathBuf>,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "concepts:          {}", self.concepts)?;
        writeln!(f, "relationships:     {}", self.relationships)?;
        writeln!(f, "patterns:          {}", self.patterns)?;
        writeln!(f, "optimization runs: {}", self.optimization_runs)?;
        writeln!(
            f,
            "mean confidence:   {:.3} (patterns {:.3}, relationships {:.3})",
            self.confidence.overall_confidence,
            self.confidence.pattern_confidence,
            self.confidence.relationship_confidence,
        )?;
        match &self.data_dir {
            Some(dir) => write!(f, "data dir:          {}", dir.display()),
            None => write!(f, "data dir:          (memory only)"),
        }
    }
}

/// The seshat engine: knowledge graph, ranker, and optimizer behind one facade.
pub struct Engine {
    graph: Arc<KnowledgeGraph>,
    params: Arc<ParameterOptimizer>,
    feedback: FeedbackLoop,
    data_dir: Option<PathBuf>,
}

impl Engine {
    /// Initialize the engine from configuration.
    pub fn new(config: EngineConfig) -> SeshatResult<Self> {
        validate_tuning(&config.tuning)?;

        let catalog = match &config.catalog_path {
            Some(path) => ParameterCatalog::load(path)?,
            None => ParameterCatalog::default(),
        };
        let tuning = GraphTuning {
            merge_threshold: config.tuning.merge_threshold,
            divergence_bound: config.tuning.divergence_bound,
            quality_learning_rate: catalog.learning_rates.quality_factor,
            lock_timeout: Duration::from_millis(config.tuning.lock_timeout_ms),
        };

        let (graph, params) = match &config.data_dir {
            Some(dir) => {
                let store = Arc::new(DurableStore::open(dir)?);
                (
                    KnowledgeGraph::with_store(tuning, Arc::clone(&store))?,
                    ParameterOptimizer::with_store(catalog, store)?,
                )
            }
            None => (
                KnowledgeGraph::new(tuning),
                ParameterOptimizer::new(catalog),
            ),
        };

        let graph = Arc::new(graph);
        let params = Arc::new(params);
        let feedback = FeedbackLoop::new(Arc::clone(&graph), Arc::clone(&params));

        tracing::info!(
            persistent = config.data_dir.is_some(),
            "seshat engine initialized"
        );
        Ok(Self {
            graph,
            params,
            feedback,
            data_dir: config.data_dir,
        })
    }

    /// Search the graph for entities relevant to a free-text query.
    ///
    /// The relevance threshold is the effective value for the domain (domain
    /// override when set, otherwise the global value).
    pub fn search(
        &self,
        query: &str,
        domain: Option<&str>,
        limit: Option<usize>,
    ) -> SeshatResult<Vec<SearchHit>> {
        let threshold = self.params.value_for("relevance_threshold", domain)?;
        let ranker = SimilarityRanker::new(&self.graph);
        Ok(ranker.search_text(query, threshold, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?)
    }

    /// Ingest a research result through the feedback loop.
    pub fn record_result(&self, result: &ResearchResult) -> SeshatResult<IngestReport> {
        self.feedback.record_result(result)
    }

    /// Record a user judgment about a query outcome.
    pub fn record_feedback(
        &self,
        query_id: &str,
        accepted: bool,
        relevance: f64,
    ) -> SeshatResult<Option<Snapshot>> {
        self.feedback.record_feedback(query_id, accepted, relevance)
    }

    /// Current parameter values and window metrics.
    pub fn snapshot_parameters(&self) -> Snapshot {
        self.params.current_snapshot()
    }

    /// Recorded optimization history, oldest first.
    pub fn parameter_history(&self) -> Vec<Snapshot> {
        self.params.history()
    }

    /// Direct access to the knowledge graph (queries, traversals).
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    /// Direct access to the parameter optimizer (overrides, explicit sets).
    pub fn params(&self) -> &ParameterOptimizer {
        &self.params
    }

    /// Summary of engine state.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            concepts: self.graph.concept_count(),
            relationships: self.graph.relationship_count(),
            patterns: self.graph.pattern_count(),
            optimization_runs: self.params.runs(),
            confidence: self.graph.confidence_metrics(),
            data_dir: self.data_dir.clone(),
        }
    }
}

fn validate_tuning(tuning: &TuningConfig) -> Result<(), EngineError> {
    if !(tuning.merge_threshold > 0.0 && tuning.merge_threshold <= 1.0) {
        return Err(EngineError::InvalidConfig {
            message: format!(
                "merge_threshold {} must be in (0.0, 1.0]",
                tuning.merge_threshold
            ),
        });
    }
    if !(0.0..=1.0).contains(&tuning.divergence_bound) {
        return Err(EngineError::InvalidConfig {
            message: format!(
                "divergence_bound {} must be in [0.0, 1.0]",
                tuning.divergence_bound
            ),
        });
    }
    if tuning.lock_timeout_ms == 0 {
        return Err(EngineError::InvalidConfig {
            message: "lock_timeout_ms must be positive".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{ConceptObservation, Extraction};

    fn memory_engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn simple_result(name: &str, confidence: f64) -> ResearchResult {
        ResearchResult {
            query: "q".into(),
            source_ref: "https://example.com".into(),
            domain: None,
            source_quality: 0.8,
            extraction: Extraction {
                concepts: vec![ConceptObservation {
                    name: name.into(),
                    description: "async runtime for network services".into(),
                    confidence,
                    metadata: serde_json::Value::Null,
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn invalid_tuning_rejected_at_init() {
        let mut config = EngineConfig::default();
        config.tuning.merge_threshold = 1.5;
        assert!(Engine::new(config).is_err());

        let mut config = EngineConfig::default();
        config.tuning.lock_timeout_ms = 0;
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn record_then_search_round_trip() {
        let engine = memory_engine();
        engine.record_result(&simple_result("tokio", 0.9)).unwrap();

        // Global relevance_threshold starts at 0.6; an on-topic query clears it.
        let hits = engine
            .search("async runtime for network services", None, None)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "tokio");
    }

    #[test]
    fn domain_override_changes_effective_threshold() {
        let engine = memory_engine();
        engine.record_result(&simple_result("tokio", 0.9)).unwrap();
        engine
            .params()
            .set_domain_override("strict", "relevance_threshold", 0.9)
            .unwrap();

        let loose = engine.search("runtime", None, Some(10)).unwrap();
        let strict = engine.search("runtime", Some("strict"), Some(10)).unwrap();
        assert!(strict.len() <= loose.len());
    }

    #[test]
    fn info_reports_counts() {
        let engine = memory_engine();
        engine.record_result(&simple_result("tokio", 0.9)).unwrap();

        let info = engine.info();
        assert_eq!(info.concepts, 1);
        assert_eq!(info.optimization_runs, 0);
        assert!(info.data_dir.is_none());
        assert!(format!("{info}").contains("concepts:          1"));
    }

    #[test]
    fn persistent_engine_restores_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        {
            let engine = Engine::new(config.clone()).unwrap();
            engine.record_result(&simple_result("tokio", 0.9)).unwrap();
        }

        let engine = Engine::new(config).unwrap();
        assert_eq!(engine.info().concepts, 1);
        assert!(engine.graph().concept_by_name("tokio").is_some());
    }
}
