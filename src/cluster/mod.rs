//! Density clustering and cluster ranking.
//!
//! ## HDBSCAN
//!
//! Hierarchical density clustering: no global epsilon, discovers the number of
//! clusters itself and marks low-density points as noise. Works on raw
//! Euclidean vectors or on cosine distances, which is what text embeddings
//! usually want.
//!
//! ## Ranking
//!
//! [`ClusterRanker`] scores every cluster either by density (inverse of the mean
//! distance to each member's nearest same-cluster neighbours) or by size, and
//! returns the top-k with ties broken by ascending cluster id.
//!
//! ## Usage
//!
//! ```rust
//! use debias::cluster::{Clustering, ClusterRanker, Hdbscan, Metric, Score};
//!
//! let mut data = Vec::new();
//! for i in 0..6 {
//!     data.push(vec![0.0 + i as f32 * 0.01, 0.0]);
//!     data.push(vec![10.0 + i as f32 * 0.01, 10.0]);
//! }
//!
//! let labels = Hdbscan::new()
//!     .with_metric(Metric::Euclidean)
//!     .with_min_cluster_size(3)
//!     .fit_predict(&data)
//!     .unwrap();
//! assert_eq!(labels.len(), data.len());
//!
//! let ranking = ClusterRanker::new(Score::Size, 1)
//!     .rank(&labels, &data, Metric::Euclidean)
//!     .unwrap();
//! assert!(ranking.clusters.len() <= 1);
//! ```

mod distance;
mod hdbscan;
mod rank;
mod traits;
pub(crate) mod util;

use std::collections::BTreeMap;

pub use distance::{DistanceMatrix, Metric};
pub use hdbscan::Hdbscan;
pub use rank::{ClusterRanker, Ranking, RankedCluster, Score};
pub use traits::Clustering;

/// Label assigned to points that belong to no cluster.
pub const NOISE: i32 = -1;

/// Group original indices by cluster label, noise excluded, in ascending label order.
///
/// Each index list is ascending.
pub fn members(labels: &[i32]) -> BTreeMap<i32, Vec<usize>> {
    let mut out: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        if label != NOISE {
            out.entry(label).or_default().push(idx);
        }
    }
    out
}

/// Number of distinct non-noise labels.
pub fn cluster_count(labels: &[i32]) -> usize {
    members(labels).len()
}

/// Number of points labeled noise.
pub fn noise_count(labels: &[i32]) -> usize {
    labels.iter().filter(|&&l| l == NOISE).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_groups_and_skips_noise() {
        let labels = [1, NOISE, 0, 1, 0, NOISE];
        let m = members(&labels);
        assert_eq!(m.len(), 2);
        assert_eq!(m[&0], vec![2, 4]);
        assert_eq!(m[&1], vec![0, 3]);
        assert_eq!(cluster_count(&labels), 2);
        assert_eq!(noise_count(&labels), 2);
    }
}
