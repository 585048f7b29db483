//! Deterministic feature-hashing embedder
//!
//! No model weights, no network: tokens and bigrams are hashed into a fixed
//! number of buckets with a sign trick to soften collisions, weighted by a
//! log term frequency, and L2-normalized. Deterministic across processes,
//! which is what the dedup and search tests rely on.

use std::collections::HashMap;

use crate::embedding::Embedder;
use crate::error::Result;

/// FNV-1a offset basis / prime (64-bit)
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Feature-hashing embedder over word unigrams and bigrams
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET;
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn bucket(&self, token: &str) -> usize {
        (Self::fnv1a(token.as_bytes()) as usize) % self.dimensions
    }

    /// Sign derived from a second hash stream to reduce collision bias
    fn sign(token: &str) -> f32 {
        if Self::fnv1a(token.as_bytes()).rotate_left(17) & 1 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(embedding);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let weight = (1.0 + count / doc_len).ln() * (1.0 + token.len() as f32 * 0.1);
            let idx = self.bucket(token);
            embedding[idx] += weight * Self::sign(token);
        }

        // Bigrams capture local word order, weighted below unigrams
        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            let idx = self.bucket(&bigram);
            embedding[idx] += 0.5 * Self::sign(&bigram);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed("the metrics backend uses postgres").unwrap();
        let b = embedder.embed("the metrics backend uses postgres").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_related_text_scores_above_unrelated() {
        let embedder = HashingEmbedder::new(384);
        let base = embedder
            .embed("the quick brown fox jumps over the lazy dog")
            .unwrap();
        let related = embedder
            .embed("a quick brown fox leaps over a lazy dog")
            .unwrap();
        let unrelated = embedder
            .embed("quantum thermodynamics lecture notes")
            .unwrap();

        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_empty_input_is_zero_vector() {
        let embedder = HashingEmbedder::new(64);
        let e = embedder.embed("").unwrap();
        assert_eq!(e.len(), 64);
        assert!(e.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_output_is_unit_length() {
        let embedder = HashingEmbedder::new(384);
        let e = embedder.embed("a sentence with enough words to matter").unwrap();
        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashingEmbedder::new(128);
        let batch = embedder.embed_batch(&["alpha beta", "gamma delta"]).unwrap();
        assert_eq!(batch[0], embedder.embed("alpha beta").unwrap());
        assert_eq!(batch[1], embedder.embed("gamma delta").unwrap());
    }
}
