//! Template similarity for pattern deduplication.
//!
//! Two patterns are the same pattern when their templates are similar enough.
//! The measure here is exact bag-of-tokens cosine similarity — deterministic
//! and symmetric, which the dedup contract requires. (The hashed embeddings
//! in [`crate::embed`] trade exactness for fixed dimension and are used for
//! ranking, not for dedup.)

use std::collections::HashMap;

use crate::embed::tokenize;

/// Default similarity above which two templates are considered the same pattern.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.85;

fn token_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity between the token-count vectors of two templates.
///
/// Returns a value in [0.0, 1.0]; 0.0 when either template has no tokens.
pub fn template_similarity(a: &str, b: &str) -> f64 {
    let ca = token_counts(a);
    let cb = token_counts(b);
    if ca.is_empty() || cb.is_empty() {
        return 0.0;
    }

    let dot: f64 = ca
        .iter()
        .filter_map(|(token, count)| cb.get(token).map(|other| count * other))
        .sum();
    let na: f64 = ca.values().map(|c| c * c).sum::<f64>().sqrt();
    let nb: f64 = cb.values().map(|c| c * c).sum::<f64>().sqrt();
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_templates_are_maximally_similar() {
        let t = "spawn a worker task per connection and await the join handle";
        assert!((template_similarity(t, t) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = "retry the request with exponential backoff";
        let b = "retry failed requests using backoff";
        assert_eq!(template_similarity(a, b), template_similarity(b, a));
    }

    #[test]
    fn token_order_does_not_matter() {
        let a = "pool connection database";
        let b = "database connection pool";
        assert!((template_similarity(a, b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_templates_fall_below_threshold() {
        let a = "retry the request with exponential backoff";
        let b = "parse unicode grapheme clusters from input";
        assert!(template_similarity(a, b) < DEFAULT_MERGE_THRESHOLD);
    }

    #[test]
    fn near_duplicates_cross_threshold() {
        let a = "acquire a connection from the pool and run the query";
        let b = "acquire a connection from the pool and run the statement";
        assert!(template_similarity(a, b) >= DEFAULT_MERGE_THRESHOLD);
    }

    #[test]
    fn empty_template_has_zero_similarity() {
        assert_eq!(template_similarity("", "anything at all"), 0.0);
        assert_eq!(template_similarity("", ""), 0.0);
    }
}
