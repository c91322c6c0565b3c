use tracing::debug;

use crate::embed::EmbeddingProvider;
use crate::error::{HarnessError, Result};
use crate::model::{Decision, RetrievalMatch};

/// Cosine similarity clamped to [-1, 1]. Empty, mismatched or zero vectors
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + (x * y), aa + (x * x), bb + (y * y))
        });

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
    }
}

/// Index and score of the best candidate. Equal scores keep the earliest
/// candidate.
pub fn top_match(query_embedding: &[f32], candidates: &[Vec<f32>]) -> Option<(usize, f32)> {
    candidates
        .iter()
        .map(|embedding| cosine_similarity(query_embedding, embedding))
        .enumerate()
        .fold(None, |best, (idx, score)| match best {
            Some((_, best_score)) if score <= best_score => best,
            _ => Some((idx, score)),
        })
}

/// Knowledge base with its entry embeddings computed once up front.
pub struct Retriever<'e, E: ?Sized> {
    embedder: &'e E,
    entries: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    threshold: f32,
}

impl<'e, E> Retriever<'e, E>
where
    E: EmbeddingProvider + ?Sized,
{
    pub fn build(embedder: &'e E, entries: Vec<String>, threshold: f32) -> Result<Self> {
        let embeddings = entries
            .iter()
            .map(|entry| embedder.embed(entry))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(HarnessError::Embedding)?;

        Ok(Self {
            embedder,
            entries,
            embeddings,
            threshold,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn retrieve(&self, query: &str) -> Result<RetrievalMatch> {
        let query_embedding = self.embedder.embed(query).map_err(HarnessError::Embedding)?;
        let (entry_index, score) =
            top_match(&query_embedding, &self.embeddings).ok_or(HarnessError::EmptyKnowledgeBase)?;

        let result = if score >= self.threshold {
            RetrievalMatch {
                entry_index,
                context: Some(self.entries[entry_index].clone()),
                score,
                decision: Decision::Hit,
            }
        } else {
            RetrievalMatch {
                entry_index,
                context: None,
                score,
                decision: Decision::Miss,
            }
        };

        debug!(
            decision = ?result.decision,
            score = result.score,
            entry_index,
            "retrieved context"
        );
        Ok(result)
    }
}
