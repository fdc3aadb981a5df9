//! Cluster scoring and top-k selection.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::distance::{DistanceMatrix, Metric};
use super::{members, NOISE};
use crate::error::{Error, Result};

/// Added to the mean neighbour distance before inverting.
const DENSITY_EPSILON: f64 = 1e-6;

/// Same-cluster neighbours averaged by the density score.
const NEIGHBORS: usize = 5;

/// How clusters are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    /// `1 / (mean k-NN distance + 1e-6)`, `k = min(5, size - 1)`; singletons score 0.
    #[default]
    Density,
    /// Cluster cardinality.
    Size,
}

/// One cluster in a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCluster {
    /// Label produced by the clusterer.
    pub cluster_id: i32,
    /// Original indices of the members, ascending.
    pub indices: Vec<usize>,
    /// Density or size, depending on the ranker's [`Score`].
    pub score: f64,
}

impl RankedCluster {
    /// Number of members.
    pub fn size(&self) -> usize {
        self.indices.len()
    }
}

/// Result of [`ClusterRanker::rank`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// At most `top_k` clusters, best first.
    pub clusters: Vec<RankedCluster>,
    /// Number of clusters that existed before truncation.
    pub total_clusters: usize,
    /// Fewer clusters existed than were requested.
    pub partial: bool,
}

/// Scores clusters and returns the best `top_k`.
#[derive(Debug, Clone)]
pub struct ClusterRanker {
    score: Score,
    top_k: usize,
}

impl ClusterRanker {
    /// Create a ranker for the given score and result count.
    pub fn new(score: Score, top_k: usize) -> Self {
        Self { score, top_k }
    }

    /// Rank clusters in `labels`.
    ///
    /// `vectors` is only read for [`Score::Density`], where it must be aligned
    /// with `labels`.
    pub fn rank(&self, labels: &[i32], vectors: &[Vec<f32>], metric: Metric) -> Result<Ranking> {
        if let Some(&bad) = labels.iter().find(|&&l| l < NOISE) {
            return Err(Error::InputInvalid(format!("invalid cluster label {bad}")));
        }
        if self.score == Score::Density && vectors.len() != labels.len() {
            return Err(Error::CountMismatch {
                artifact: "vectors".to_string(),
                expected: labels.len(),
                found: vectors.len(),
            });
        }

        let groups: Vec<(i32, Vec<usize>)> = members(labels).into_iter().collect();
        let total_clusters = groups.len();

        let mut scored: Vec<RankedCluster> = match self.score {
            Score::Size => groups
                .into_iter()
                .map(|(cluster_id, indices)| RankedCluster {
                    cluster_id,
                    score: indices.len() as f64,
                    indices,
                })
                .collect(),
            Score::Density => groups
                .into_par_iter()
                .map(|(cluster_id, indices)| RankedCluster {
                    cluster_id,
                    score: self.density(&indices, vectors, metric),
                    indices,
                })
                .collect(),
        };

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.cluster_id.cmp(&b.cluster_id))
        });
        scored.truncate(self.top_k);

        let partial = total_clusters < self.top_k;
        if partial {
            tracing::debug!(
                requested = self.top_k,
                available = total_clusters,
                "fewer clusters than requested"
            );
        }

        Ok(Ranking {
            clusters: scored,
            total_clusters,
            partial,
        })
    }

    fn density(&self, indices: &[usize], vectors: &[Vec<f32>], metric: Metric) -> f64 {
        let size = indices.len();
        let k = NEIGHBORS.min(size.saturating_sub(1));
        if k == 0 {
            return 0.0;
        }

        let points: Vec<&[f32]> = indices.iter().map(|&i| vectors[i].as_slice()).collect();
        let dists = DistanceMatrix::compute(&points, metric);

        let mut total = 0.0f64;
        let mut row: Vec<f32> = Vec::with_capacity(size - 1);
        for i in 0..size {
            row.clear();
            row.extend(
                dists
                    .row(i)
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, &d)| d),
            );
            row.sort_by(|a, b| a.total_cmp(b));
            total += row[..k].iter().map(|&d| f64::from(d)).sum::<f64>();
        }
        let avg = total / (size * k) as f64;
        1.0 / (avg + DENSITY_EPSILON)
    }
}
