//! Distance computation.
//!
//! All metrics are normalized to "lower = closer" so kernels can share one
//! ordering: results sort by (distance asc, vector id asc).

use shardvec_core::DistanceMetric;

/// Distance between `query` and `target` under `metric`.
///
/// - `L2`: squared euclidean distance.
/// - `InnerProduct`: negated dot product, so larger products rank closer.
/// - `Cosine`: `1 - cosine_similarity`; zero-norm inputs rank farthest.
pub fn compute_distance(query: &[f32], target: &[f32], metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::L2 => query
            .iter()
            .zip(target)
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum(),
        DistanceMetric::InnerProduct => {
            -query.iter().zip(target).map(|(a, b)| a * b).sum::<f32>()
        }
        DistanceMetric::Cosine => {
            let dot: f32 = query.iter().zip(target).map(|(a, b)| a * b).sum();
            let norm_q: f32 = query.iter().map(|a| a * a).sum::<f32>().sqrt();
            let norm_t: f32 = target.iter().map(|b| b * b).sum::<f32>().sqrt();
            if norm_q == 0.0 || norm_t == 0.0 {
                return f32::MAX;
            }
            1.0 - dot / (norm_q * norm_t)
        }
    }
}
