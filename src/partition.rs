//! Dataset partitioning ("debiasing").
//!
//! The largest clusters are thinned by removing a fixed fraction of their
//! members. The result is a pair of disjoint index sets covering every
//! original index; records, raw vectors and reduced vectors are then sliced
//! with exactly those index sets so row `i` of every kept artifact refers to
//! the same original record.
//!
//! Sampling is reproducible: each cluster gets a fresh generator seeded with
//! the configured seed and samples from its members sorted ascending.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterRanker, Metric, Score};
use crate::error::{Error, Result};
use crate::store::VectorStore;
use crate::table::RecordTable;

/// How removal counts are computed across the selected clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingScope {
    /// `floor(size * fraction)` from each cluster independently.
    #[default]
    PerCluster,
    /// `floor(total * fraction)` from the union of the selected clusters.
    Pooled,
}

/// Why a selected cluster contributed no removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Fewer than two members.
    TooSmall,
    /// None of its members are valid record indices.
    Missing,
}

/// Per-cluster outcome of a partitioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRemoval {
    /// Label produced by the clusterer.
    pub cluster_id: i32,
    /// Members that are valid record indices.
    pub original_size: usize,
    /// Members moved to the removed side.
    pub removed: usize,
    /// Members whose index was outside the record table.
    #[serde(default)]
    pub out_of_range: usize,
    /// Set when the cluster was selected but not pruned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl ClusterRemoval {
    /// Members left on the kept side.
    pub fn remaining(&self) -> usize {
        self.original_size - self.removed
    }

    /// Percentage of the cluster that was removed.
    pub fn removed_percent(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            self.removed as f64 / self.original_size as f64 * 100.0
        }
    }
}

/// Kept/removed index sets plus the per-cluster bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Size of the record table the indices refer to.
    pub n_records: usize,
    /// Ascending.
    pub kept: Vec<usize>,
    /// Ascending.
    pub removed: Vec<usize>,
    /// One entry per cluster selected for pruning, largest first.
    pub clusters: Vec<ClusterRemoval>,
}

/// One side of a partition, sliced from every artifact with the same indices.
#[derive(Debug, Clone)]
pub struct AlignedSplit {
    pub records: RecordTable,
    pub vectors: VectorStore,
    /// Absent when reduction was skipped.
    pub reduced: Option<VectorStore>,
}

/// Selects and removes a fraction of the largest clusters.
#[derive(Debug, Clone)]
pub struct Debiaser {
    prune_count: usize,
    removal_fraction: f64,
    seed: u64,
    scope: SamplingScope,
}

impl Default for Debiaser {
    fn default() -> Self {
        Self {
            prune_count: 3,
            removal_fraction: 0.5,
            seed: 42,
            scope: SamplingScope::PerCluster,
        }
    }
}

impl Debiaser {
    /// Prune the `prune_count` largest clusters, removing `removal_fraction`
    /// of each with a sampler seeded by `seed`.
    ///
    /// Fails with [`Error::InvalidParameter`] unless the fraction is in `[0, 1]`.
    pub fn new(prune_count: usize, removal_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&removal_fraction) {
            return Err(Error::InvalidParameter {
                name: "removal_fraction",
                message: "must be within [0, 1]",
            });
        }
        Ok(Self {
            prune_count,
            removal_fraction,
            seed,
            scope: SamplingScope::PerCluster,
        })
    }

    /// Sample per cluster (default) or once over the pooled members.
    pub fn with_scope(mut self, scope: SamplingScope) -> Self {
        self.scope = scope;
        self
    }

    /// Partition `0..n_records` using `labels`.
    ///
    /// Labels referring to indices at or beyond `n_records` are ignored; a
    /// selected cluster left with no valid members is skipped and recorded.
    pub fn partition(&self, n_records: usize, labels: &[i32]) -> Result<Partition> {
        let ranking = ClusterRanker::new(Score::Size, self.prune_count).rank(
            labels,
            &[],
            Metric::default(),
        )?;

        let mut clusters = Vec::with_capacity(ranking.clusters.len());
        let mut candidates: Vec<(usize, Vec<usize>)> = Vec::new();
        for ranked in &ranking.clusters {
            let valid: Vec<usize> = ranked
                .indices
                .iter()
                .copied()
                .filter(|&i| i < n_records)
                .collect();
            let out_of_range = ranked.size() - valid.len();
            let skipped = if valid.is_empty() {
                Some(SkipReason::Missing)
            } else if valid.len() < 2 {
                Some(SkipReason::TooSmall)
            } else {
                None
            };
            match skipped {
                Some(reason) => tracing::warn!(
                    cluster = ranked.cluster_id,
                    size = ranked.size(),
                    ?reason,
                    "skipping cluster for pruning"
                ),
                None => candidates.push((clusters.len(), valid.clone())),
            }
            if out_of_range > 0 {
                tracing::warn!(
                    cluster = ranked.cluster_id,
                    out_of_range,
                    "cluster members beyond record table ignored"
                );
            }
            clusters.push(ClusterRemoval {
                cluster_id: ranked.cluster_id,
                original_size: valid.len(),
                removed: 0,
                out_of_range,
                skipped,
            });
        }

        let mut removed: Vec<usize> = match self.scope {
            SamplingScope::PerCluster => {
                let mut all = Vec::new();
                for (slot, members) in &candidates {
                    let picked = self.sample(members);
                    clusters[*slot].removed = picked.len();
                    all.extend(picked);
                }
                all
            }
            SamplingScope::Pooled => {
                let mut pool: Vec<usize> = candidates
                    .iter()
                    .flat_map(|(_, m)| m.iter().copied())
                    .collect();
                pool.sort_unstable();
                pool.dedup();
                let picked = self.sample(&pool);
                for (slot, members) in &candidates {
                    clusters[*slot].removed = members
                        .iter()
                        .filter(|i| picked.binary_search(i).is_ok())
                        .count();
                }
                picked
            }
        };
        removed.sort_unstable();
        removed.dedup();

        let mut is_removed = vec![false; n_records];
        for &i in &removed {
            is_removed[i] = true;
        }
        let kept: Vec<usize> = (0..n_records).filter(|&i| !is_removed[i]).collect();

        let partition = Partition {
            n_records,
            kept,
            removed,
            clusters,
        };
        partition.verify()?;

        tracing::info!(
            kept = partition.kept.len(),
            removed = partition.removed.len(),
            scope = ?self.scope,
            "partitioned dataset"
        );
        Ok(partition)
    }

    /// `floor(len * fraction)` members of `sorted`, returned ascending.
    fn sample(&self, sorted: &[usize]) -> Vec<usize> {
        let amount = ((sorted.len() as f64) * self.removal_fraction).floor() as usize;
        let amount = amount.min(sorted.len());
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked: Vec<usize> = index::sample(&mut rng, sorted.len(), amount)
            .into_iter()
            .map(|pos| sorted[pos])
            .collect();
        picked.sort_unstable();
        picked
    }
}

impl Partition {
    /// Every index in `0..n_records` appears in exactly one side.
    pub fn verify(&self) -> Result<()> {
        let mut seen = vec![0u8; self.n_records];
        for &i in self.kept.iter().chain(&self.removed) {
            let slot = seen.get_mut(i).ok_or_else(|| {
                Error::Consistency(format!("index {i} outside 0..{}", self.n_records))
            })?;
            *slot += 1;
            if *slot > 1 {
                return Err(Error::Consistency(format!(
                    "index {i} appears in both kept and removed"
                )));
            }
        }
        if let Some(missing) = seen.iter().position(|&c| c == 0) {
            return Err(Error::Consistency(format!(
                "index {missing} is in neither kept nor removed"
            )));
        }
        Ok(())
    }

    pub fn removed_percent(&self) -> f64 {
        if self.n_records == 0 {
            0.0
        } else {
            self.removed.len() as f64 / self.n_records as f64 * 100.0
        }
    }

    /// Slice all artifacts with the kept and removed index sets.
    pub fn split(
        &self,
        records: &RecordTable,
        vectors: &VectorStore,
        reduced: Option<&VectorStore>,
    ) -> Result<(AlignedSplit, AlignedSplit)> {
        check_count("records", self.n_records, records.len())?;
        check_count("vectors", self.n_records, vectors.len())?;
        if let Some(r) = reduced {
            check_count("reduced vectors", self.n_records, r.len())?;
        }
        let side = |indices: &[usize]| -> Result<AlignedSplit> {
            Ok(AlignedSplit {
                records: records.select(indices)?,
                vectors: vectors.select(indices)?,
                reduced: reduced.map(|r| r.select(indices)).transpose()?,
            })
        };
        Ok((side(&self.kept)?, side(&self.removed)?))
    }
}

fn check_count(artifact: &str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::CountMismatch {
            artifact: artifact.to_string(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NOISE;

    fn labels_10_5_5() -> Vec<i32> {
        let mut labels = vec![0; 10];
        labels.extend([1; 5]);
        labels.extend([2; 5]);
        labels
    }

    #[test]
    fn removes_floor_half_of_each_top_cluster() {
        let p = Debiaser::default().partition(20, &labels_10_5_5()).unwrap();
        let removed: Vec<usize> = p.clusters.iter().map(|c| c.removed).collect();
        assert_eq!(removed, vec![5, 2, 2]);
        assert_eq!(p.kept.len(), 11);
        assert_eq!(p.removed.len(), 9);
        assert_eq!(p.kept.len() + p.removed.len(), 20);
    }

    #[test]
    fn same_seed_same_partition() {
        let labels = labels_10_5_5();
        let a = Debiaser::default().partition(20, &labels).unwrap();
        let b = Debiaser::default().partition(20, &labels).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn samples_stay_inside_their_cluster() {
        let p = Debiaser::default().partition(20, &labels_10_5_5()).unwrap();
        assert_eq!(p.removed.iter().filter(|&&i| i < 10).count(), 5);
        assert_eq!(p.removed.iter().filter(|&&i| (10..15).contains(&i)).count(), 2);
        assert_eq!(p.removed.iter().filter(|&&i| i >= 15).count(), 2);
    }

    #[test]
    fn singleton_cluster_never_pruned() {
        // Only two clusters: sizes 4 and 1, plus noise.
        let labels = [0, 0, 0, 0, 1, NOISE, NOISE];
        let p = Debiaser::default().partition(7, &labels).unwrap();
        let singleton = p.clusters.iter().find(|c| c.cluster_id == 1).unwrap();
        assert_eq!(singleton.removed, 0);
        assert_eq!(singleton.skipped, Some(SkipReason::TooSmall));
        assert!(!p.removed.contains(&4));
        assert_eq!(p.removed.len(), 2);
    }

    #[test]
    fn noise_is_never_removed() {
        let labels = [NOISE, 0, 0, 0, 0, NOISE];
        let p = Debiaser::default().partition(6, &labels).unwrap();
        assert!(!p.removed.contains(&0));
        assert!(!p.removed.contains(&5));
    }

    #[test]
    fn cluster_beyond_record_table_is_skipped() {
        // Labels cover 8 points but only 5 records exist.
        let labels = [0, 0, 0, 0, 0, 1, 1, 1];
        let p = Debiaser::default().partition(5, &labels).unwrap();
        let gone = p.clusters.iter().find(|c| c.cluster_id == 1).unwrap();
        assert_eq!(gone.skipped, Some(SkipReason::Missing));
        assert_eq!(gone.out_of_range, 3);
        assert_eq!(p.removed.len(), 2);
        p.verify().unwrap();
    }

    #[test]
    fn pooled_scope_samples_the_union() {
        let p = Debiaser::default()
            .with_scope(SamplingScope::Pooled)
            .partition(20, &labels_10_5_5())
            .unwrap();
        assert_eq!(p.removed.len(), 10);
        let total: usize = p.clusters.iter().map(|c| c.removed).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn prune_count_limits_selected_clusters() {
        let p = Debiaser::new(1, 0.5, 42)
            .unwrap()
            .partition(20, &labels_10_5_5())
            .unwrap();
        assert_eq!(p.clusters.len(), 1);
        assert_eq!(p.clusters[0].cluster_id, 0);
        assert!(p.removed.iter().all(|&i| i < 10));
    }

    #[test]
    fn invalid_fraction_rejected() {
        assert!(Debiaser::new(3, 1.5, 0).is_err());
        assert!(Debiaser::new(3, f64::NAN, 0).is_err());
    }

    #[test]
    fn verify_detects_overlap_and_gaps() {
        let overlap = Partition {
            n_records: 3,
            kept: vec![0, 1],
            removed: vec![1, 2],
            clusters: vec![],
        };
        assert!(matches!(overlap.verify(), Err(Error::Consistency(_))));
        let gap = Partition {
            n_records: 3,
            kept: vec![0],
            removed: vec![2],
            clusters: vec![],
        };
        assert!(matches!(gap.verify(), Err(Error::Consistency(_))));
    }

    #[test]
    fn split_keeps_artifacts_aligned() {
        let n = 20;
        let records = RecordTable::new(
            vec!["text".into()],
            (0..n).map(|i| vec![format!("row {i}")]).collect(),
        )
        .unwrap();
        let vectors = VectorStore::from_rows((0..n).map(|i| vec![i as f32, 0.0]).collect()).unwrap();
        let reduced = VectorStore::from_rows((0..n).map(|i| vec![-(i as f32)]).collect()).unwrap();

        let p = Debiaser::default().partition(n, &labels_10_5_5()).unwrap();
        let (kept, removed) = p.split(&records, &vectors, Some(&reduced)).unwrap();

        for (side, indices) in [(&kept, &p.kept), (&removed, &p.removed)] {
            assert_eq!(side.records.original_indices(), indices.as_slice());
            for (row, &orig) in indices.iter().enumerate() {
                assert_eq!(side.vectors.get(row).unwrap()[0], orig as f32);
                assert_eq!(side.reduced.as_ref().unwrap().get(row).unwrap()[0], -(orig as f32));
            }
        }
    }

    #[test]
    fn split_rejects_misaligned_vectors() {
        let records = RecordTable::new(
            vec!["text".into()],
            (0..20).map(|i| vec![i.to_string()]).collect(),
        )
        .unwrap();
        let vectors = VectorStore::from_rows(vec![vec![0.0]; 19]).unwrap();
        let p = Debiaser::default().partition(20, &labels_10_5_5()).unwrap();
        assert!(matches!(
            p.split(&records, &vectors, None),
            Err(Error::CountMismatch { .. })
        ));
    }
}
