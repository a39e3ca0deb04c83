//! Embeddings
//!
//! The engine never runs a model itself; it consumes an `Embedder`
//! capability provided by the hosting process. Failures are non-fatal
//! everywhere: ingest-side indexing logs and skips, query-side legs degrade
//! to keyword-only results.
//!
//! `HashingEmbedder` is a deterministic, dependency-free fallback used by
//! tests and by deployments without a model runtime: token hashes are
//! scattered into a fixed-dimension vector and normalized, so identical
//! texts agree exactly and token overlap correlates with cosine similarity.

use std::sync::Mutex;

use crate::text::fnv1a;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// The embedding backend is not available
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),
    /// Failed to generate an embedding
    #[error("Embedding generation failed: {0}")]
    Failed(String),
    /// Invalid input (empty, too long)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// A text-to-vector capability
pub trait Embedder: Send + Sync {
    /// Embed one text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, preserving order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output dimensionality
    fn dimensions(&self) -> usize;

    /// Version tag persisted with every stored vector; a mismatch marks the
    /// stored vector stale
    fn model_version(&self) -> &str;
}

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A stored embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Dimensions of the vector
    pub dimensions: usize,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Convert to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }

    /// Normalize the vector to unit length
    pub fn normalize(&mut self) {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }
}

// ============================================================================
// HASHING EMBEDDER
// ============================================================================

/// Deterministic bag-of-tokens embedder
pub struct HashingEmbedder {
    dimensions: usize,
    version: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashingEmbedder {
    /// Create an embedder with the given output dimension
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            version: format!("hashing-v1-{dimensions}d"),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token);
            let index = (hash % self.dimensions as u64) as usize;
            // Second hash bit decides the sign so common tokens cancel less
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let mut embedding = Embedding::new(vector);
        embedding.normalize();
        Ok(embedding.vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

// ============================================================================
// COUNTING EMBEDDER (test instrumentation)
// ============================================================================

/// Wraps another embedder and counts embed calls; used to assert that hub
/// documents are served from storage instead of being recomputed.
pub struct CountingEmbedder<E> {
    inner: E,
    calls: Mutex<u64>,
}

impl<E: Embedder> CountingEmbedder<E> {
    /// Wrap an embedder
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            calls: Mutex::new(0),
        }
    }

    /// Number of `embed`/`embed_batch` texts processed so far
    pub fn call_count(&self) -> u64 {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

impl<E: Embedder> Embedder for CountingEmbedder<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        self.inner.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += texts.len() as u64;
        }
        self.inner.embed_batch(texts)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_version(&self) -> &str {
        self.inner.model_version()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::cosine_similarity;

    #[test]
    fn test_embedding_byte_roundtrip() {
        let embedding = Embedding::new(vec![0.5, -1.25, 3.0]);
        let bytes = embedding.to_bytes();
        assert_eq!(bytes.len(), 12);
        let back = Embedding::from_bytes(&bytes).unwrap();
        assert_eq!(back, embedding);

        assert!(Embedding::from_bytes(&[1, 2, 3]).is_none());
        assert_eq!(Embedding::from_bytes(&[]).unwrap().dimensions, 0);
    }

    #[test]
    fn test_normalize() {
        let mut embedding = Embedding::new(vec![3.0, 4.0]);
        embedding.normalize();
        let norm: f32 = embedding.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        // Zero vector stays zero
        let mut zero = Embedding::new(vec![0.0, 0.0]);
        zero.normalize();
        assert_eq!(zero.vector, vec![0.0, 0.0]);
    }

    #[test]
    fn test_hashing_embedder_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("connection pool sizing").unwrap();
        let b = embedder.embed("connection pool sizing").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hashing_embedder_similarity_tracks_overlap() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder.embed("database connection pool exhausted").unwrap();
        let near = embedder.embed("connection pool exhausted under load").unwrap();
        let far = embedder.embed("css grid layout alignment").unwrap();

        let near_sim = cosine_similarity(&base, &near);
        let far_sim = cosine_similarity(&base, &far);
        assert!(near_sim > far_sim);
    }

    #[test]
    fn test_hashing_embedder_rejects_empty() {
        let embedder = HashingEmbedder::default();
        assert!(embedder.embed("   ").is_err());
        assert_eq!(embedder.dimensions(), 384);
        assert!(embedder.model_version().contains("384"));
    }

    #[test]
    fn test_counting_embedder() {
        let embedder = CountingEmbedder::new(HashingEmbedder::new(32));
        embedder.embed("one").unwrap();
        embedder
            .embed_batch(&["two".to_string(), "three".to_string()])
            .unwrap();
        assert_eq!(embedder.call_count(), 3);
    }
}
