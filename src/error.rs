//! Rich diagnostic error types for the seshat engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the seshat engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum SeshatError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rank(#[from] RankError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("concept not found: id {id}")]
    #[diagnostic(
        code(seshat::graph::concept_not_found),
        help(
            "The concept id does not exist in the knowledge graph. \
             Relationships may only reference concepts that have already been \
             upserted — ingest the endpoint concepts first."
        )
    )]
    ConceptNotFound { id: u64 },

    #[error("concept not found by name: \"{name}\"")]
    #[diagnostic(
        code(seshat::graph::concept_name_not_found),
        help(
            "No concept with this name exists. Concept names are matched \
             case-insensitively; check the spelling or upsert the concept first."
        )
    )]
    ConceptNameNotFound { name: String },

    #[error("pattern not found: id {id}")]
    #[diagnostic(
        code(seshat::graph::pattern_not_found),
        help("The pattern id does not exist. List patterns with `seshat info`.")
    )]
    PatternNotFound { id: u64 },

    #[error("invalid confidence {value} for {context}: must be in [0.0, 1.0]")]
    #[diagnostic(
        code(seshat::graph::invalid_confidence),
        help(
            "Confidence scores and evidence strengths are unit-interval scalars. \
             NaN and out-of-range values are rejected before any mutation is applied."
        )
    )]
    InvalidConfidence { value: f64, context: String },

    #[error("missing required field \"{field}\" in {context}")]
    #[diagnostic(
        code(seshat::graph::missing_field),
        help("Extraction records are validated at the ingestion boundary; fill in the field.")
    )]
    MissingField { field: String, context: String },

    #[error("contention on entity key \"{key}\": lock not acquired within {timeout_ms} ms")]
    #[diagnostic(
        code(seshat::graph::contention),
        help(
            "Another writer holds this entity's lock. The operation was not applied \
             and is safe to retry with backoff — upserts are idempotent-by-merge."
        )
    )]
    Contention { key: String, timeout_ms: u64 },

    #[error("id space exhausted: cannot allocate more than u64::MAX entities")]
    #[diagnostic(
        code(seshat::graph::id_exhausted),
        help(
            "The entity id space is exhausted. This requires 2^64 allocations and \
             should never happen in practice — check for an allocation loop."
        )
    )]
    IdSpaceExhausted,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Ranker errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RankError {
    #[error("empty query: nothing to embed")]
    #[diagnostic(
        code(seshat::rank::empty_query),
        help("Provide a non-empty query string or a non-empty query embedding.")
    )]
    EmptyQuery,

    #[error("query embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(seshat::rank::dim_mismatch),
        help(
            "The query embedding must match the dimension used when the items \
             were embedded. Re-embed the query with the same encoder."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Parameter errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ParamError {
    #[error("unknown parameter: \"{name}\"")]
    #[diagnostic(
        code(seshat::param::unknown),
        help("Only parameters declared in the catalog are tunable. List them with `seshat params`.")
    )]
    UnknownParameter { name: String },

    #[error("invalid metric \"{name}\" = {value}: must be a finite value in [0.0, 1.0]")]
    #[diagnostic(
        code(seshat::param::invalid_metric),
        help(
            "Optimization metrics must be finite unit-interval values. The \
             optimization run was rejected without mutating parameter state."
        )
    )]
    InvalidMetric { name: String, value: f64 },

    #[error("value {value} for \"{name}\" outside bounds [{min}, {max}]")]
    #[diagnostic(
        code(seshat::param::out_of_bounds),
        help("Parameter values must respect the catalog bounds at all times.")
    )]
    OutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(seshat::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(seshat::store::redb),
        help(
            "The embedded database encountered a transaction error. The mutation \
             was not acknowledged — do not assume it was applied. If the problem \
             persists, try a fresh data directory and file a bug report."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(seshat::store::serde),
        help(
            "Failed to serialize or deserialize stored data. This usually means \
             the stored data format has changed between versions. Try re-ingesting."
        )
    )]
    Serialization { message: String },

    #[error("key not found: {key}")]
    #[diagnostic(
        code(seshat::store::not_found),
        help("The requested key does not exist in the store. Verify the key is correct.")
    )]
    NotFound { key: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read parameter catalog: {path}")]
    #[diagnostic(
        code(seshat::config::read),
        help("Ensure the catalog file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameter catalog: {path}")]
    #[diagnostic(
        code(seshat::config::parse),
        help("Check the TOML syntax in the catalog file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid bounds for parameter \"{name}\": {message}")]
    #[diagnostic(
        code(seshat::config::invalid_bounds),
        help(
            "Every catalog entry needs min_value <= max_value, a positive \
             step_size, and finite learning rates."
        )
    )]
    InvalidBounds { name: String, message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(seshat::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(seshat::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },
}

/// Convenience alias for functions returning seshat results.
pub type SeshatResult<T> = std::result::Result<T, SeshatError>;
