//! Embedding gateway seam
//!
//! Vector computation and similarity search live outside the core; the
//! retrieval engine only needs these two calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A concept found by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub concept_id: String,
    /// Similarity score, higher is closer
    pub score: f32,
}

impl ConceptMatch {
    pub fn new(concept_id: impl Into<String>, score: f32) -> Self {
        Self {
            concept_id: concept_id.into(),
            score,
        }
    }
}

/// Text embedding and nearest-concept search
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a piece of text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The `k` concepts closest to `vector`, highest score first
    async fn nearest_concepts(&self, vector: &[f32], k: usize) -> Result<Vec<ConceptMatch>>;
}

/// Cosine similarity of two vectors; 0.0 when lengths differ or either is zero
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
