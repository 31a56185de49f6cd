//! Utterance embedding port

/// Sentence encoder used by the route cache and the multi-agent classifier.
///
/// Implementations wrap whatever embedding model the deployment ships;
/// the orchestrator only needs a dense vector per utterance.
pub trait UtteranceEncoder: Send + Sync {
    /// Encode text into a dense vector. Vectors from one encoder instance
    /// must share a dimension.
    fn encode(&self, text: &str) -> Vec<f32>;

    /// Embedding dimension
    fn dim(&self) -> usize;
}
