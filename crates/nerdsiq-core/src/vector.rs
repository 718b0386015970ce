//! In-memory [`VectorIndex`] for tests and local experiments.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Search is brute-force over every stored point in the collection.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{IndexPoint, ScoredPoint};
use crate::provider::{Distance, VectorIndex};

struct Collection {
    vector_size: usize,
    distance: Distance,
    points: Vec<IndexPoint>,
}

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection, or `None` if it does not exist.
    pub fn point_count(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|c| c.points.len())
    }

    /// Ids stored in a collection, ascending.
    pub fn point_ids(&self, collection: &str) -> Option<Vec<u64>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|c| {
                let mut ids: Vec<u64> = c.points.iter().map(|p| p.id).collect();
                ids.sort_unstable();
                ids
            })
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        // Negated so that larger is always better.
        Distance::Euclid => -a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                vector_size,
                distance,
                points: Vec::new(),
            });
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(coll) = collections.get(collection) else {
            bail!("Collection not found: {}", collection);
        };
        if vector.len() != coll.vector_size {
            bail!(
                "Query vector has {} dimensions, collection '{}' expects {}",
                vector.len(),
                collection,
                coll.vector_size
            );
        }

        let mut scored: Vec<ScoredPoint> = coll
            .points
            .iter()
            .map(|p| ScoredPoint {
                payload: p.payload.clone(),
                score: score(coll.distance, vector, &p.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(coll) = collections.get_mut(collection) else {
            bail!("Collection not found: {}", collection);
        };
        for point in points {
            if point.vector.len() != coll.vector_size {
                bail!(
                    "Point {} has {} dimensions, collection '{}' expects {}",
                    point.id,
                    point.vector.len(),
                    collection,
                    coll.vector_size
                );
            }
            coll.points.retain(|p| p.id != point.id);
            coll.points.push(point.clone());
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}
