//! # seshat
//!
//! A confidence-weighted knowledge graph with online parameter optimization:
//! concepts, relationships, and patterns accumulated from research results,
//! each carrying a confidence score that is merged (never overwritten) on
//! repeat observation, plus a bounded adaptive controller that tunes
//! retrieval thresholds from sparse, noisy feedback.
//!
//! ## Architecture
//!
//! - **Confidence arithmetic** (`confidence`): pure EMA merge/clamp, never errors
//! - **Knowledge graph** (`knowledge`): concurrent entity maps + petgraph topology,
//!   per-key locking with bounded waits
//! - **Ranking** (`rank`): cosine × confidence scoring with a relevance cutoff
//! - **Parameters** (`params`): immutable catalog + online bounded optimizer
//! - **Feedback loop** (`feedback`): the one writer that feeds both the graph
//!   and the optimizer
//! - **Durable storage** (`store`): ACID key-value store backed by redb
//!
//! ## Library usage
//!
//! ```no_run
//! use seshat::engine::{Engine, EngineConfig};
//! use seshat::research::{ConceptObservation, Extraction, ResearchResult};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let result = ResearchResult {
//!     query: "rust async runtimes".into(),
//!     source_ref: "https://example.com/article".into(),
//!     domain: Some("rust".into()),
//!     source_quality: 0.8,
//!     extraction: Extraction {
//!         concepts: vec![ConceptObservation {
//!             name: "tokio".into(),
//!             description: "asynchronous runtime".into(),
//!             confidence: 0.8,
//!             metadata: serde_json::Value::Null,
//!         }],
//!         ..Default::default()
//!     },
//! };
//! engine.record_result(&result).unwrap();
//! let hits = engine.search("async runtime", Some("rust"), None).unwrap();
//! ```

pub mod confidence;
pub mod embed;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod knowledge;
pub mod params;
pub mod rank;
pub mod research;
pub mod store;
