use crate::embed::EmbeddingProvider;
use crate::error::{HarnessError, Result};
use crate::retrieval::cosine_similarity;

/// Semantic similarity between an expected answer and the actual reply.
pub struct Scorer<'e, E: ?Sized> {
    embedder: &'e E,
    threshold: f32,
}

impl<'e, E> Scorer<'e, E>
where
    E: EmbeddingProvider + ?Sized,
{
    pub fn new(embedder: &'e E, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    pub fn similarity(&self, expected: &str, actual: &str) -> Result<f32> {
        let expected = self
            .embedder
            .embed(expected)
            .map_err(HarnessError::Embedding)?;
        let actual = self.embedder.embed(actual).map_err(HarnessError::Embedding)?;
        Ok(cosine_similarity(&expected, &actual))
    }

    pub fn passes(&self, similarity: f32) -> bool {
        similarity >= self.threshold
    }
}
