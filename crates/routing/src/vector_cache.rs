//! Per-route utterance vector cache
//!
//! Holds the embeddings of one route's example utterances and answers
//! nearest-neighbor queries against them.

use voxflow_core::UtteranceEncoder;

/// Cosine similarity between two vectors of equal length
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embeddings for one route's utterances
pub struct VectorCache {
    utterances: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl VectorCache {
    /// Embed and index the given utterances
    pub fn build(utterances: &[String], encoder: &dyn UtteranceEncoder) -> Self {
        let vectors = utterances.iter().map(|u| encoder.encode(u)).collect();
        Self {
            utterances: utterances.to_vec(),
            vectors,
        }
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Index, utterance and score of the entry nearest to the query vector
    pub fn nearest(&self, query: &[f32]) -> Option<(usize, &str, f32)> {
        self.nearest_k(query, 1).into_iter().next()
    }

    /// The `k` nearest entries, best first
    pub fn nearest_k(&self, query: &[f32], k: usize) -> Vec<(usize, &str, f32)> {
        let mut scored: Vec<(usize, &str, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, self.utterances[i].as_str(), cosine(query, v)))
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Best similarity score of the query against any entry
    pub fn best_score(&self, query: &[f32]) -> f32 {
        self.vectors
            .iter()
            .map(|v| cosine(query, v))
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HashEncoder;

    #[test]
    fn test_exact_match_scores_one() {
        let encoder = HashEncoder::default();
        let utterances = vec![
            "turn on the lights".to_string(),
            "switch off everything".to_string(),
        ];
        let cache = VectorCache::build(&utterances, &encoder);

        let query = encoder.encode("turn on the lights");
        let (idx, utterance, score) = cache.nearest(&query).unwrap();

        assert_eq!(idx, 0);
        assert_eq!(utterance, "turn on the lights");
        assert!(score > 0.99);
    }

    #[test]
    fn test_nearest_k_ordering() {
        let encoder = HashEncoder::default();
        let utterances = vec![
            "hello there".to_string(),
            "hello".to_string(),
            "completely unrelated phrase".to_string(),
        ];
        let cache = VectorCache::build(&utterances, &encoder);

        let query = encoder.encode("hello");
        let top = cache.nearest_k(&query, 2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].1, "hello");
        assert!(top[0].2 >= top[1].2);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
