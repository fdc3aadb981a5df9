//! Dense pairwise distances.
//!
//! Both HDBSCAN and the density ranker work from a full `n x n` matrix. Rows
//! are filled independently with rayon; every cell is computed by the same
//! kernel regardless of thread count, so the matrix is identical to a serial
//! build.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::util;

/// Distance function used for clustering and density scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Straight-line distance on the raw vectors.
    Euclidean,
    /// `1 - cosine similarity`; the usual choice for text embeddings.
    #[default]
    Cosine,
}

impl Metric {
    /// Distance between two equal-length vectors.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => util::squared_euclidean(a, b).sqrt(),
            Metric::Cosine => util::cosine_distance(a, b),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Euclidean => f.write_str("euclidean"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

/// Symmetric `n x n` distance matrix stored row-major.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f32>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances between `points` under `metric`.
    pub fn compute<P: AsRef<[f32]> + Sync>(points: &[P], metric: Metric) -> Self {
        let n = points.len();
        let mut data = vec![0.0f32; n * n];
        if n > 0 {
            data.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
                for (j, cell) in row.iter_mut().enumerate() {
                    if i != j {
                        // Order the arguments so (i, j) and (j, i) are bit-identical.
                        let (x, y) = if i < j { (i, j) } else { (j, i) };
                        *cell = metric.distance(points[x].as_ref(), points[y].as_ref());
                    }
                }
            });
        }
        Self { n, data }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the matrix covers zero points.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Distance between points `i` and `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    /// Distances from point `i` to every point (including itself, at 0).
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let pts = vec![vec![0.0f32, 1.0], vec![3.0, 4.0], vec![-1.0, 0.5]];
        for metric in [Metric::Euclidean, Metric::Cosine] {
            let m = DistanceMatrix::compute(&pts, metric);
            assert_eq!(m.len(), 3);
            for i in 0..3 {
                assert_eq!(m.get(i, i), 0.0);
                for j in 0..3 {
                    assert_eq!(m.get(i, j).to_bits(), m.get(j, i).to_bits());
                }
            }
        }
    }

    #[test]
    fn euclidean_matches_hand_computation() {
        let pts = vec![vec![0.0f32, 0.0], vec![3.0, 4.0]];
        let m = DistanceMatrix::compute(&pts, Metric::Euclidean);
        assert!((m.get(0, 1) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn metric_parses_lowercase() {
        let m: Metric = serde_json::from_str("\"euclidean\"").unwrap();
        assert_eq!(m, Metric::Euclidean);
        assert_eq!(Metric::default(), Metric::Cosine);
    }
}
