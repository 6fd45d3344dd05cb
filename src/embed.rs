//! Built-in text embedding: deterministic hashed bag-of-tokens vectors.
//!
//! The ranker scores items by cosine similarity between embeddings. In a full
//! deployment embeddings come from the extraction layer and are stored
//! verbatim; this module provides the fallback encoder used when none were
//! supplied (CLI queries, pattern templates). The encoding is deterministic
//! across runs and platforms — token hashing uses FNV-1a rather than the
//! standard library's randomized hasher.

/// Dimension of the built-in embedding space.
pub const EMBED_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Embed text as an L2-normalized hashed bag-of-tokens vector.
///
/// Each token hashes to a bucket and a sign; token counts accumulate into the
/// signed buckets (the classic hashing trick). Returns the zero vector for
/// text with no tokens.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; EMBED_DIM];
    for token in tokenize(text) {
        let hash = fnv1a(&token);
        let bucket = (hash % EMBED_DIM as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign;
    }
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vec {
            *x /= norm;
        }
    }
    vec
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm. Callers are responsible for
/// dimension agreement; mismatched lengths compare over the common prefix.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = embed_text("async connection pool with retry");
        let b = embed_text("async connection pool with retry");
        assert_eq!(a, b);
    }

    #[test]
    fn identical_text_has_unit_similarity() {
        let v = embed_text("spawn a tokio task per request");
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = embed_text("error handling with thiserror");
        let b = embed_text("structured logging with tracing");
        assert!((cosine(&a, &b) - cosine(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let query = embed_text("connection pool for database access");
        let related = embed_text("database connection pool sizing");
        let unrelated = embed_text("parsing unicode grapheme clusters");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = embed_text("   \t\n");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&v, &embed_text("anything")), 0.0);
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Retry-With Backoff, twice!"),
            vec!["retry", "with", "backoff", "twice"]
        );
    }
}
