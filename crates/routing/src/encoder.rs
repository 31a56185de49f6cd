//! Model-free fallback encoder
//!
//! Deterministic hash-based embeddings, usable in tests and as a degraded
//! fallback when no embedding model is configured. Identical strings encode
//! identically; unrelated strings score low under cosine similarity.

use voxflow_core::UtteranceEncoder;

/// Hash-based utterance encoder (no model required)
pub struct HashEncoder {
    dim: usize,
}

impl HashEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl UtteranceEncoder for HashEncoder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];

        for (i, c) in text.to_lowercase().chars().enumerate() {
            let idx = (c as usize + i) % self.dim;
            embedding[idx] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
