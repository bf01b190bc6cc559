use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Embedder;
use crate::models::{Segment, SegmentKey};

/// Where a retrieved passage came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    #[serde(flatten)]
    pub key: SegmentKey,
}

/// A passage returned by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub metadata: PassageMetadata,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexedPassage {
    text: String,
    metadata: PassageMetadata,
    embedding: Vec<f32>,
}

/// Per-run semantic index over transcript segments
///
/// Built with `index` once per transcript, then shared read-only (behind an
/// `Arc`) by every coder for the rest of the run.
pub struct RetrievalIndex {
    embedder: Arc<dyn Embedder>,
    passages: Vec<IndexedPassage>,
}

impl RetrievalIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            passages: Vec::new(),
        }
    }

    /// Embed and register a transcript's segments; returns the number added
    pub async fn index(&mut self, transcript_id: &str, segments: &[Segment]) -> Result<usize> {
        if segments.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed segments of {}", transcript_id))?;

        if embeddings.len() != segments.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} segments",
                embeddings.len(),
                segments.len()
            );
        }

        for (segment, embedding) in segments.iter().zip(embeddings) {
            self.passages.push(IndexedPassage {
                text: segment.text.clone(),
                metadata: PassageMetadata {
                    key: segment.key.clone(),
                },
                embedding,
            });
        }

        debug!("Indexed {} segments for {}", segments.len(), transcript_id);
        Ok(segments.len())
    }

    /// Up to `k` passages by descending similarity, ties in insertion order
    ///
    /// Blank queries return nothing without touching the embedder.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        if text.trim().is_empty() || k == 0 || self.passages.is_empty() {
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .context("Failed to embed query")?
            .into_iter()
            .next()
            .context("Embedder returned no vector for query")?;

        let mut scored: Vec<(usize, f32)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (i, cosine_similarity(&query, &p.embedding)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievedPassage {
                text: self.passages[i].text.clone(),
                metadata: self.passages[i].metadata.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
