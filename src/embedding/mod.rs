//! Embedding generation and the process-wide provider
//!
//! The embedding model is treated as an oracle mapping text to an
//! L2-normalized f32 vector. The crate ships a deterministic feature-hashing
//! embedder; remote models plug in through the [`Embedder`] trait. Oracle
//! failure is always recoverable: callers store the memory embedding-less.

mod hashing;

pub use hashing::HashingEmbedder;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;

/// Default embedding dimensionality for the built-in embedder
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate an L2-normalized embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Model name for diagnostics
    fn model_name(&self) -> &str;
}

static PROVIDER: Lazy<RwLock<Option<Arc<dyn Embedder>>>> = Lazy::new(|| RwLock::new(None));
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Get the process-wide embedding provider, constructing it on first use.
///
/// Construction is serialized so concurrent first callers build at most one
/// oracle; the first use runs a throwaway warmup embed.
pub fn provider() -> Arc<dyn Embedder> {
    if let Some(p) = PROVIDER.read().clone() {
        return p;
    }
    let _guard = INIT_LOCK.lock();
    if let Some(p) = PROVIDER.read().clone() {
        return p;
    }
    let p: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DEFAULT_DIMENSIONS));
    if let Err(e) = p.embed("warmup") {
        tracing::warn!("embedder warmup failed: {}", e);
    }
    *PROVIDER.write() = Some(p.clone());
    p
}

/// Replace the process-wide provider (tests substitute deterministic oracles)
pub fn set_provider(p: Arc<dyn Embedder>) {
    *PROVIDER.write() = Some(p);
}

/// Drop the process-wide provider so the next use re-initializes
pub fn reset_provider() {
    *PROVIDER.write() = None;
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Pack an embedding as a little-endian f32 blob (4 bytes per dimension)
pub fn pack_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Unpack a little-endian f32 blob; returns None on a misaligned length
pub fn unpack_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25_f32, -1.5, 0.0, 3.75];
        let blob = pack_embedding(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(unpack_embedding(&blob).unwrap(), v);
    }

    #[test]
    fn test_unpack_rejects_misaligned_blob() {
        assert!(unpack_embedding(&[0, 1, 2]).is_none());
    }

    #[test]
    fn test_provider_is_singleton() {
        reset_provider();
        let a = provider();
        let b = provider();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.dimensions(), DEFAULT_DIMENSIONS);
        reset_provider();
    }
}
