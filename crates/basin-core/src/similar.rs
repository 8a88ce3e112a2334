//! Query-time similarity ranking over a population matrix.
//!
//! Two metrics with opposite scales, never conflated: Euclidean
//! distance over signature or PCA-reduced space (lower = more similar)
//! and cosine similarity over externally produced embedding vectors
//! (higher = more similar). The caller names the metric; ties break by
//! ascending entity id so rankings are deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::matrix::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Environmental similarity: distance in signature/reduced space.
    Euclidean,
    /// Semantic similarity: cosine over embedding vectors.
    Cosine,
}

/// A similarity query: an entity already in the population (excluded
/// from its own results), or a free vector in the population's space.
#[derive(Debug, Clone)]
pub enum Query<'a> {
    Id(u64),
    Vector(&'a [f64]),
}

/// Rank the population against the query and return the top `k`
/// (entity id, score) pairs, best first.
pub fn nearest(
    query: &Query<'_>,
    population: &FeatureMatrix,
    k: usize,
    metric: Metric,
) -> Result<Vec<(u64, f64)>> {
    let (target, exclude): (&[f64], Option<u64>) = match query {
        Query::Id(id) => {
            let pos = population.position(*id).ok_or(BasinError::UnknownEntity(*id))?;
            (population.row(pos), Some(*id))
        }
        Query::Vector(v) => {
            // A shorter or longer vector would silently zip against a
            // truncated row and rank on the wrong subspace.
            if v.len() != population.n_cols {
                return Err(BasinError::DimensionMismatch {
                    expected: population.n_cols,
                    got: v.len(),
                });
            }
            (v, None)
        }
    };

    let mut scored: Vec<(u64, f64)> = population
        .ids
        .iter()
        .enumerate()
        .filter(|(_, &id)| Some(id) != exclude)
        .map(|(i, &id)| (id, score(target, population.row(i), metric)))
        .collect();

    scored.sort_by(|a, b| match metric {
        // Ascending distance, then ascending id.
        Metric::Euclidean => a
            .1
            .partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0)),
        // Descending similarity, then ascending id.
        Metric::Cosine => b
            .1
            .partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0)),
    });
    scored.truncate(k);
    Ok(scored)
}

fn score(a: &[f64], b: &[f64], metric: Metric) -> f64 {
    match metric {
        Metric::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt(),
        Metric::Cosine => {
            let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
            let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
            if na > 0.0 && nb > 0.0 {
                dot / (na * nb)
            } else {
                0.0
            }
        }
    }
}
