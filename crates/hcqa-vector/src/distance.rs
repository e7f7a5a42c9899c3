//! Distance functions for embedding vectors
//!
//! Every metric is expressed as a distance: smaller means nearer, so the
//! index can rank all of them the same way.

use hcqa_core::DistanceMetric;

/// Distance between two vectors of equal length under `metric`.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let d = match metric {
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::DotProduct => -dot_product(a, b),
    };
    // -0.0 and 0.0 must rank as equal
    d + 0.0
}

/// Euclidean (L2) distance between two vectors.
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// 1 - cosine similarity, in [0, 2].
///
/// A zero-magnitude vector is treated as orthogonal to everything.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a * norm_b)
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
