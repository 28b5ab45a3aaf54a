//! In-memory vector store using cosine similarity.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use super::SearchResult;

/// A chunk of a source document together with its embedding.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, Value>,
}

/// Chunks are kept in insertion order so ties resolve deterministically.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps the whole collection for `incoming` in one write. A later
    /// chunk with a repeated id overwrites the earlier one in place.
    pub async fn replace(&self, incoming: Vec<StoredChunk>) {
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(incoming.len());
        let mut next: Vec<StoredChunk> = Vec::with_capacity(incoming.len());
        for chunk in incoming {
            match positions.get(&chunk.id) {
                Some(&i) => next[i] = chunk,
                None => {
                    positions.insert(chunk.id.clone(), next.len());
                    next.push(chunk);
                }
            }
        }
        *self.chunks.write().await = next;
    }

    pub async fn count(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Top `k` chunks by similarity, highest first.
    pub async fn search(&self, embedding: &[f32], k: usize) -> Vec<SearchResult> {
        let chunks = self.chunks.read().await;
        let mut scored: Vec<(f64, &StoredChunk)> = chunks
            .iter()
            .map(|c| {
                let distance = 1.0 - cosine_similarity(&c.embedding, embedding) as f64;
                (distance_to_score(distance), c)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(score, c)| SearchResult {
                content: c.text.clone(),
                score,
                metadata: c.metadata.clone(),
                trace: None,
            })
            .collect()
    }
}

/// Returns 0.0 if either vector has zero magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
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

/// Maps a distance onto a `[0, 1]` relevance score.
///
/// Distances up to 1 map linearly (`1 - d`); larger ones decay as
/// `1 / (1 + d)` so cosine distances near 2 still rank above zero.
pub fn distance_to_score(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    let score = if distance <= 1.0 {
        1.0 - distance
    } else {
        1.0 / (1.0 + distance)
    };
    score.clamp(0.0, 1.0)
}
