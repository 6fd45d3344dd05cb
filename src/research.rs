//! Research result ingestion types.
//!
//! A [`ResearchResult`] is the unit of input to the feedback loop: a query,
//! the extraction produced for it, and the source material it came from.
//! Validation happens here at the boundary so the graph only ever sees
//! well-formed observations.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::knowledge::GraphResult;

/// A concept observation extracted from source material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptObservation {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Observed confidence in [0.0, 1.0].
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A relationship observation between two named concepts.
///
/// Endpoints are referenced by name; they resolve against the concepts in the
/// same extraction plus anything already in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipObservation {
    pub source: String,
    pub target: String,
    pub rel_type: String,
    /// Observed confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Strength of the backing evidence in [0.0, 1.0]; defaults to the
    /// observation confidence when absent.
    #[serde(default)]
    pub evidence_strength: Option<f64>,
}

/// A pattern observation: a recurring template seen in the source material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternObservation {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
    /// Observed confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Names of concepts this pattern involves.
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Everything extracted from one research result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub concepts: Vec<ConceptObservation>,
    #[serde(default)]
    pub relationships: Vec<RelationshipObservation>,
    #[serde(default)]
    pub patterns: Vec<PatternObservation>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.relationships.is_empty() && self.patterns.is_empty()
    }
}

/// One completed research step: the query, its extraction, and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    /// The query or task that produced this result.
    pub query: String,
    /// Reference to the source material (URL, document id).
    pub source_ref: String,
    /// Domain tag applied to extracted patterns (e.g. "rust", "databases").
    #[serde(default)]
    pub domain: Option<String>,
    /// Overall quality of the source in [0.0, 1.0].
    pub source_quality: f64,
    /// Extracted observations.
    #[serde(default)]
    pub extraction: Extraction,
}

impl ResearchResult {
    /// Validate every confidence-like field before any graph mutation.
    ///
    /// A result that fails validation is rejected whole; partial ingestion of
    /// a malformed result would leave the graph in an inconsistent state.
    pub fn validate(&self) -> GraphResult<()> {
        if self.query.trim().is_empty() {
            return Err(GraphError::MissingField {
                field: "query".into(),
                context: "research result".into(),
            });
        }
        if self.source_ref.trim().is_empty() {
            return Err(GraphError::MissingField {
                field: "source_ref".into(),
                context: "research result".into(),
            });
        }
        crate::confidence::validate_unit(self.source_quality, "source quality")?;

        for concept in &self.extraction.concepts {
            if concept.name.trim().is_empty() {
                return Err(GraphError::MissingField {
                    field: "name".into(),
                    context: "concept observation".into(),
                });
            }
            crate::confidence::validate_unit(concept.confidence, "concept confidence")?;
        }
        for rel in &self.extraction.relationships {
            if rel.source.trim().is_empty() || rel.target.trim().is_empty() {
                return Err(GraphError::MissingField {
                    field: "source/target".into(),
                    context: "relationship observation".into(),
                });
            }
            if rel.rel_type.trim().is_empty() {
                return Err(GraphError::MissingField {
                    field: "rel_type".into(),
                    context: "relationship observation".into(),
                });
            }
            crate::confidence::validate_unit(rel.confidence, "relationship confidence")?;
            if let Some(strength) = rel.evidence_strength {
                crate::confidence::validate_unit(strength, "evidence strength")?;
            }
        }
        for pattern in &self.extraction.patterns {
            if pattern.template.trim().is_empty() {
                return Err(GraphError::MissingField {
                    field: "template".into(),
                    context: "pattern observation".into(),
                });
            }
            crate::confidence::validate_unit(pattern.confidence, "pattern confidence")?;
        }
        Ok(())
    }
}
