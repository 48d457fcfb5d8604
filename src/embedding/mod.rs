//! Deterministic sketch embeddings: a character-trigram hash sketch plus an
//! LLM-extracted keyword sketch, L2-normalized. Not a learned embedding —
//! correctness is reproducibility and the ordering it yields on
//! near-duplicate text, not semantic depth.

#[cfg(feature = "llm")]
mod llm_keywords;

use crate::error::{EngineError, Result};
use crate::types::EMBEDDING_VECTOR_SIZE;
use async_trait::async_trait;

const TRIGRAM_BUCKETS: usize = 64;
const MAX_TRIGRAMS: usize = 64;
const KEYWORD_WEIGHT: f32 = 2.0;

/// Extracts 5–10 comma-separated keyword concepts from text via an LLM.
/// A failed or missing extraction yields an empty set — the embedding is
/// still produced, just without the keyword half of the sketch.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract_keywords(&self, text: &str) -> Vec<String>;
}

/// Extractor that always returns no keywords, used when no LLM credential
/// is configured, and in tests that need embedding determinism without a
/// live LLM round-trip.
pub struct NoopKeywordExtractor;

#[async_trait]
impl KeywordExtractor for NoopKeywordExtractor {
    async fn extract_keywords(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Builds fixed-length L2-normalized embeddings from text.
pub struct EmbeddingBuilder {
    extractor: Box<dyn KeywordExtractor>,
}

impl EmbeddingBuilder {
    pub fn new(extractor: Box<dyn KeywordExtractor>) -> Self {
        Self { extractor }
    }

    /// Build an `EmbeddingBuilder` backed by the configured LLM, or a
    /// no-op extractor when `llm_api_key` is absent.
    #[cfg(feature = "llm")]
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        match &cfg.llm_api_key {
            Some(key) => Self::new(Box::new(llm_keywords::OpenAiKeywordExtractor::new(
                key.clone(),
                cfg.llm_base_url.clone(),
                cfg.llm_request_timeout_ms,
            ))),
            None => Self::new(Box::new(NoopKeywordExtractor)),
        }
    }

    #[cfg(not(feature = "llm"))]
    pub fn from_config(_cfg: &crate::config::Config) -> Self {
        Self::new(Box::new(NoopKeywordExtractor))
    }

    /// Turn `text` into a 128-dim L2-normalized vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let keywords = self.extractor.extract_keywords(text).await;
        Ok(embed_with_keywords(text, &keywords))
    }
}

/// Pure, synchronous half of the algorithm — exposed separately so tests
/// can pin the keyword list and assert determinism without async/LLM
/// machinery.
pub fn embed_with_keywords(text: &str, keywords: &[String]) -> Vec<f32> {
    let mut v = vec![0f32; EMBEDDING_VECTOR_SIZE];
    let lower = text.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();

    let mut count = 0;
    for window in chars.windows(3) {
        if count >= MAX_TRIGRAMS {
            break;
        }
        let trigram: String = window.iter().collect();
        let h = shift_add_hash(&trigram);
        let bucket = (h as usize) % TRIGRAM_BUCKETS;
        v[bucket] += 1.0;
        count += 1;
    }

    for keyword in keywords {
        let h = shift_add_hash(keyword);
        let bucket = TRIGRAM_BUCKETS + (h as usize) % TRIGRAM_BUCKETS;
        v[bucket] += KEYWORD_WEIGHT;
    }

    l2_normalize(&mut v);
    v
}

/// `h = h*31 + byte`, wrapping, absolute value as an unsigned 32-bit hash.
fn shift_add_hash(s: &str) -> u32 {
    let mut h: i32 = 0;
    for b in s.as_bytes() {
        h = h.wrapping_mul(31).wrapping_add(*b as i32);
    }
    h.unsigned_abs()
}

fn l2_normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product over the product of L2 norms. Both vectors must be the
/// same length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EngineError::InvalidInput(format!(
            "cosine_similarity requires equal-length vectors, got {} and {}",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_l2_normalized() {
        let v = embed_with_keywords("Always use ULIDs for IDs", &["id".to_string()]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let v = embed_with_keywords("", &[]);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn deterministic_given_same_inputs() {
        let a = embed_with_keywords("hello world", &["greeting".into()]);
        let b = embed_with_keywords("hello world", &["greeting".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn near_duplicate_text_ranks_above_unrelated_text() {
        let base = embed_with_keywords("the quick brown fox jumps", &[]);
        let near = embed_with_keywords("the quick brown fox leaps", &[]);
        let far = embed_with_keywords("completely different subject matter here", &[]);
        let sim_near = cosine_similarity(&base, &near).unwrap();
        let sim_far = cosine_similarity(&base, &far).unwrap();
        assert!(sim_near > sim_far);
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_lengths() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[tokio::test]
    async fn builder_with_noop_extractor_still_embeds() {
        let builder = EmbeddingBuilder::new(Box::new(NoopKeywordExtractor));
        let v = builder.embed("some content").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_VECTOR_SIZE);
    }
}
