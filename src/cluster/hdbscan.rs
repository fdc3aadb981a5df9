//! HDBSCAN: Hierarchical Density-Based Spatial Clustering of Applications with Noise.
//!
//! HDBSCAN (Campello, Moulavi, Sander 2013) removes DBSCAN's global epsilon and
//! instead builds a hierarchy of density-based clusters, then keeps the most
//! stable ones.
//!
//! # Algorithm Outline
//!
//! 1. **Core distance**: distance from each point to its `min_samples`-th nearest
//!    other point.
//!
//! 2. **Mutual reachability distance**:
//!    `mrd(i, j) = max(core_dist[i], core_dist[j], dist(i, j))`.
//!
//! 3. **MST** over mutual reachability distances (Prim, O(n^2)), sorted ascending
//!    and replayed through a union-find into a single-linkage dendrogram.
//!
//! 4. **Condensed tree**: walk the dendrogram top-down. A split where both sides
//!    have at least `min_cluster_size` points births two child clusters; a side
//!    smaller than that "falls out" of the parent as individual points.
//!
//! 5. **Excess of mass**: stability of a cluster is
//!    `sum_children (lambda_child - lambda_birth) * child_size` with
//!    `lambda = 1 / distance`. Bottom-up, a cluster is kept if its stability is at
//!    least the summed stability of its selected descendants. The root is never
//!    selected.
//!
//! 6. **Labeling**: each point takes the label of the selected cluster it fell out
//!    of (directly or through a non-selected descendant); all others are `NOISE`.
//!
//! Labels are numbered `0..k` in condensed-tree order, so identical input always
//! yields identical labels.
//!
//! # Small inputs
//!
//! When the dataset has fewer points than `min_cluster_size`, the effective value
//! drops to `max(2, n / 2)`, and `min_samples` is clamped to `n - 1`. Inputs that
//! cannot form any cluster (a single point, identical vectors) come back as all
//! noise instead of an error.
//!
//! # References
//!
//! Campello, R. J. G. B., Moulavi, D., Sander, J. (2013). "Density-Based Clustering
//! Based on Hierarchical Density Estimates." PAKDD 2013.

use super::distance::{DistanceMatrix, Metric};
use super::traits::Clustering;
use super::util::{self, UnionFind};
use super::NOISE;
use crate::error::{Error, Result};

/// Smallest distance used when converting to lambda; keeps duplicate points finite.
const MIN_DISTANCE: f64 = 1e-12;

/// HDBSCAN clustering algorithm.
#[derive(Debug, Clone)]
pub struct Hdbscan {
    min_samples: Option<usize>,
    min_cluster_size: usize,
    metric: Metric,
}

impl Hdbscan {
    /// Create a new HDBSCAN clusterer with default parameters.
    ///
    /// Defaults: `min_cluster_size = 5`, `min_samples = min_cluster_size`,
    /// cosine metric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `min_samples` (k for core distance computation).
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    /// Set `min_cluster_size` (minimum points for a cluster to persist).
    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Configured metric.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// `(min_cluster_size, min_samples)` actually used for a dataset of `n` points.
    pub fn effective_params(&self, n: usize) -> (usize, usize) {
        let mut min_cluster_size = self.min_cluster_size.max(2);
        if n < min_cluster_size {
            min_cluster_size = (n / 2).max(2);
        }
        let requested = self.min_samples.unwrap_or(self.min_cluster_size).max(1);
        let min_samples = requested.min(n.saturating_sub(1)).max(1);
        (min_cluster_size, min_samples)
    }

    /// Cluster from a precomputed distance matrix.
    pub fn fit_predict_distances(&self, dists: &DistanceMatrix) -> Result<Vec<i32>> {
        let n = dists.len();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        self.validate()?;
        if n == 1 {
            return Ok(vec![NOISE]);
        }

        let (min_cluster_size, min_samples) = self.effective_params(n);
        tracing::debug!(n, min_cluster_size, min_samples, "hdbscan parameters");

        let core_dists = core_distances(dists, min_samples);

        let mut mst = util::prim_mst(n, |i, j| {
            mutual_reachability(dists.get(i, j), core_dists[i], core_dists[j])
        });
        mst.sort_by(|a, b| a.2.total_cmp(&b.2));

        let linkage = single_linkage(&mst, n);
        if linkage.len() + 1 != n {
            return Err(Error::Other(format!(
                "minimum spanning tree is disconnected: {} merges for {n} points",
                linkage.len()
            )));
        }

        let condensed = condense(&linkage, n, min_cluster_size);
        Ok(extract_clusters(&condensed, n))
    }

    fn validate(&self) -> Result<()> {
        if self.min_cluster_size == 0 {
            return Err(Error::InvalidParameter {
                name: "min_cluster_size",
                message: "must be at least 1",
            });
        }
        if self.min_samples == Some(0) {
            return Err(Error::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_samples: None,
            min_cluster_size: 5,
            metric: Metric::Cosine,
        }
    }
}

impl Clustering for Hdbscan {
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<i32>> {
        let n = data.len();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        self.validate()?;

        let d = data[0].len();
        if d == 0 {
            return Err(Error::InvalidParameter {
                name: "dimension",
                message: "must be at least 1",
            });
        }
        for point in data.iter().skip(1) {
            if point.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
        }

        let dists = DistanceMatrix::compute(data, self.metric);
        self.fit_predict_distances(&dists)
    }
}

fn core_distances(dists: &DistanceMatrix, min_samples: usize) -> Vec<f32> {
    let n = dists.len();
    let k = min_samples.min(n - 1).max(1);
    let mut core = Vec::with_capacity(n);
    let mut row: Vec<f32> = Vec::with_capacity(n - 1);
    for i in 0..n {
        row.clear();
        row.extend(
            dists
                .row(i)
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &d)| d),
        );
        let (_, kth, _) = row.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
        core.push(*kth);
    }
    core
}

#[inline]
fn mutual_reachability(dist: f32, core_i: f32, core_j: f32) -> f32 {
    dist.max(core_i).max(core_j)
}

#[inline]
fn lambda_of(dist: f32) -> f64 {
    1.0 / f64::from(dist).max(MIN_DISTANCE)
}

// ---------------------------------------------------------------------------
// Single-linkage dendrogram
// ---------------------------------------------------------------------------

/// Internal dendrogram node; node id `n + i` lives at index `i`.
struct LinkageNode {
    left: usize,
    right: usize,
    distance: f32,
    size: usize,
}

fn single_linkage(mst: &[(usize, usize, f32)], n: usize) -> Vec<LinkageNode> {
    let mut uf = UnionFind::new(n);
    // UF root -> dendrogram node currently representing that component.
    let mut comp_node: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<LinkageNode> = Vec::with_capacity(n.saturating_sub(1));

    for &(u, v, distance) in mst {
        let ru = uf.find(u);
        let rv = uf.find(v);
        if ru == rv {
            continue;
        }
        let left = comp_node[ru];
        let right = comp_node[rv];
        let size = node_size(&nodes, n, left) + node_size(&nodes, n, right);
        let id = n + nodes.len();
        nodes.push(LinkageNode {
            left,
            right,
            distance,
            size,
        });
        let root = uf.union_roots(ru, rv);
        comp_node[root] = id;
    }
    nodes
}

#[inline]
fn node_size(nodes: &[LinkageNode], n: usize, node: usize) -> usize {
    if node < n {
        1
    } else {
        nodes[node - n].size
    }
}

// ---------------------------------------------------------------------------
// Condensed cluster tree
// ---------------------------------------------------------------------------

/// An entry in the condensed cluster tree stored as a flat table.
///
/// Each row represents either:
/// - A point falling out of a cluster (child is a point index, child_size = 1)
/// - A cluster splitting into a child cluster (child is a cluster id >= n)
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

/// Condense the dendrogram. Cluster ids start at `n` (the root); a child id is
/// always greater than its parent's.
fn condense(linkage: &[LinkageNode], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let root = n + linkage.len() - 1;
    let mut condensed = Vec::with_capacity(n + 2 * linkage.len());
    let mut next_cluster_id = n + 1;
    // (dendrogram node, condensed cluster it belongs to)
    let mut stack = vec![(root, n)];

    while let Some((node, cluster)) = stack.pop() {
        let link = &linkage[node - n];
        let lambda = lambda_of(link.distance);
        let left_size = node_size(linkage, n, link.left);
        let right_size = node_size(linkage, n, link.right);

        match (
            left_size >= min_cluster_size,
            right_size >= min_cluster_size,
        ) {
            (true, true) => {
                for (child, child_size) in [(link.left, left_size), (link.right, right_size)] {
                    let child_cluster = next_cluster_id;
                    next_cluster_id += 1;
                    condensed.push(CondensedEdge {
                        parent: cluster,
                        child: child_cluster,
                        lambda,
                        child_size,
                    });
                    stack.push((child, child_cluster));
                }
            }
            (true, false) => {
                push_fallouts(&mut condensed, linkage, n, link.right, cluster, lambda);
                stack.push((link.left, cluster));
            }
            (false, true) => {
                push_fallouts(&mut condensed, linkage, n, link.left, cluster, lambda);
                stack.push((link.right, cluster));
            }
            (false, false) => {
                push_fallouts(&mut condensed, linkage, n, link.left, cluster, lambda);
                push_fallouts(&mut condensed, linkage, n, link.right, cluster, lambda);
            }
        }
    }
    condensed
}

/// Record every point under dendrogram `node` as falling out of `cluster`.
fn push_fallouts(
    condensed: &mut Vec<CondensedEdge>,
    linkage: &[LinkageNode],
    n: usize,
    node: usize,
    cluster: usize,
    lambda: f64,
) {
    let mut pending = vec![node];
    while let Some(cur) = pending.pop() {
        if cur < n {
            condensed.push(CondensedEdge {
                parent: cluster,
                child: cur,
                lambda,
                child_size: 1,
            });
        } else {
            let link = &linkage[cur - n];
            pending.push(link.right);
            pending.push(link.left);
        }
    }
}

fn extract_clusters(condensed: &[CondensedEdge], n: usize) -> Vec<i32> {
    let max_cluster = condensed
        .iter()
        .map(|e| if e.child >= n { e.child } else { e.parent })
        .max()
        .unwrap_or(n);
    let num_clusters = max_cluster - n + 1;
    if num_clusters <= 1 {
        // Only the root exists and the root is never selected.
        return vec![NOISE; n];
    }

    let mut lambda_birth = vec![0.0f64; num_clusters];
    let mut cluster_parent = vec![usize::MAX; num_clusters];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
    for edge in condensed.iter().filter(|e| e.child >= n) {
        let child = edge.child - n;
        let parent = edge.parent - n;
        lambda_birth[child] = edge.lambda;
        cluster_parent[child] = parent;
        children[parent].push(child);
    }

    let mut stability = vec![0.0f64; num_clusters];
    for edge in condensed {
        let c = edge.parent - n;
        stability[c] += edge.child_size as f64 * (edge.lambda - lambda_birth[c]);
    }

    // Bottom-up excess-of-mass selection. Children always have larger ids than
    // their parents, so descending id order visits children first. Index 0 is the
    // root and is skipped.
    let mut selected = vec![false; num_clusters];
    let mut subtree_stab = stability.clone();
    for c in (1..num_clusters).rev() {
        if children[c].is_empty() {
            selected[c] = true;
            continue;
        }
        let child_sum: f64 = children[c].iter().map(|&ch| subtree_stab[ch]).sum();
        if child_sum > stability[c] {
            subtree_stab[c] = child_sum;
        } else {
            selected[c] = true;
            deselect_descendants(&children, c, &mut selected);
        }
    }

    // Nearest selected ancestor (inclusive), resolved top-down.
    let mut owner: Vec<Option<usize>> = vec![None; num_clusters];
    for c in 1..num_clusters {
        owner[c] = if selected[c] {
            Some(c)
        } else {
            owner[cluster_parent[c]]
        };
    }

    let mut label_map = vec![NOISE; num_clusters];
    let mut next_label = 0i32;
    for (c, &sel) in selected.iter().enumerate() {
        if sel {
            label_map[c] = next_label;
            next_label += 1;
        }
    }

    let mut labels = vec![NOISE; n];
    for edge in condensed.iter().filter(|e| e.child < n) {
        if let Some(c) = owner[edge.parent - n] {
            labels[edge.child] = label_map[c];
        }
    }
    labels
}

fn deselect_descendants(children: &[Vec<usize>], node: usize, selected: &mut [bool]) {
    let mut pending: Vec<usize> = children[node].clone();
    while let Some(child) = pending.pop() {
        selected[child] = false;
        pending.extend_from_slice(&children[child]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn make_cluster(center: &[f32], n: usize, spread: f32) -> Vec<Vec<f32>> {
        let dim = center.len();
        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            let mut p = Vec::with_capacity(dim);
            for (d, &c) in center.iter().enumerate() {
                let offset = spread * ((i * 7 + d * 13) % 11) as f32 / 11.0 - spread / 2.0;
                p.push(c + offset);
            }
            points.push(p);
        }
        points
    }

    fn euclidean() -> Hdbscan {
        Hdbscan::new().with_metric(Metric::Euclidean)
    }

    #[test]
    fn two_well_separated_clusters() {
        let mut data = make_cluster(&[0.0, 0.0], 20, 0.5);
        data.extend(make_cluster(&[20.0, 20.0], 20, 0.5));

        let hdbscan = euclidean().with_min_samples(3).with_min_cluster_size(10);
        let labels = hdbscan.fit_predict(&data).unwrap();

        assert_eq!(labels.len(), 40);

        let l0 = labels[0];
        assert_ne!(l0, NOISE);
        for &l in &labels[1..20] {
            assert_eq!(l, l0);
        }

        let l20 = labels[20];
        assert_ne!(l20, NOISE);
        for &l in &labels[21..40] {
            assert_eq!(l, l20);
        }

        assert_ne!(l0, l20);
    }

    #[test]
    fn clusters_with_different_densities() {
        let mut data = make_cluster(&[0.0, 0.0], 30, 0.3);
        data.extend(make_cluster(&[50.0, 50.0], 30, 3.0));

        let labels = euclidean()
            .with_min_samples(3)
            .with_min_cluster_size(5)
            .fit_predict(&data)
            .unwrap();

        let dense_non_noise = labels[..30].iter().filter(|&&l| l != NOISE).count();
        let sparse_non_noise = labels[30..].iter().filter(|&&l| l != NOISE).count();
        assert!(
            dense_non_noise >= 20,
            "dense cluster should have most points assigned, got {dense_non_noise}"
        );
        assert!(
            sparse_non_noise >= 15,
            "sparse cluster should have many points assigned, got {sparse_non_noise}"
        );

        let dense: HashSet<i32> = labels[..30].iter().copied().filter(|&l| l != NOISE).collect();
        let sparse: HashSet<i32> = labels[30..].iter().copied().filter(|&l| l != NOISE).collect();
        assert!(dense.is_disjoint(&sparse), "{labels:?}");
    }

    #[test]
    fn cosine_separates_directions() {
        // Two bundles of directions; magnitudes vary wildly but cosine ignores them.
        let mut data = Vec::new();
        for i in 0..12 {
            let scale = 1.0 + i as f32;
            let jitter = (i % 4) as f32 * 0.01;
            data.push(vec![scale, scale * jitter, 0.0]);
        }
        for i in 0..12 {
            let scale = 1.0 + i as f32 * 3.0;
            let jitter = (i % 4) as f32 * 0.01;
            data.push(vec![0.0, scale * jitter, scale]);
        }

        let hdbscan = Hdbscan::new()
            .with_metric(Metric::Cosine)
            .with_min_samples(3)
            .with_min_cluster_size(6);
        let labels = hdbscan.fit_predict(&data).unwrap();

        let first: HashSet<i32> = labels[..12].iter().copied().collect();
        let second: HashSet<i32> = labels[12..].iter().copied().collect();
        assert!(first.is_disjoint(&second), "{labels:?}");
    }

    #[test]
    fn noise_points_between_clusters() {
        let mut data = make_cluster(&[0.0, 0.0], 15, 0.3);
        data.extend(make_cluster(&[20.0, 20.0], 15, 0.3));
        data.push(vec![10.0, 10.0]);
        data.push(vec![8.0, 12.0]);
        data.push(vec![12.0, 8.0]);

        let hdbscan = euclidean().with_min_samples(3).with_min_cluster_size(5);
        let labels = hdbscan.fit_predict(&data).unwrap();

        let non_noise: HashSet<i32> = labels.iter().copied().filter(|&l| l != NOISE).collect();
        assert!(non_noise.len() >= 2, "should find at least 2 clusters");
        assert!(labels[31..].iter().all(|&l| l == NOISE), "{labels:?}");
    }

    #[test]
    fn all_noise_high_min_cluster_size() {
        let data = vec![vec![0.0, 0.0], vec![10.0, 10.0], vec![20.0, 20.0]];

        let hdbscan = euclidean().with_min_samples(2).with_min_cluster_size(100);
        let labels = hdbscan.fit_predict(&data).unwrap();

        assert!(labels.iter().all(|&l| l == NOISE));
    }

    #[test]
    fn identical_vectors_are_all_noise() {
        let data = vec![vec![1.0, 2.0, 3.0]; 12];
        let labels = euclidean()
            .with_min_cluster_size(3)
            .fit_predict(&data)
            .unwrap();
        assert!(labels.iter().all(|&l| l == NOISE));
    }

    #[test]
    fn single_point_is_noise() {
        let labels = euclidean().fit_predict(&[vec![1.0, 1.0]]).unwrap();
        assert_eq!(labels, vec![NOISE]);
    }

    #[test]
    fn adaptive_params_for_small_inputs() {
        let h = Hdbscan::new().with_min_cluster_size(15).with_min_samples(5);
        assert_eq!(h.effective_params(100), (15, 5));
        assert_eq!(h.effective_params(10), (5, 5));
        assert_eq!(h.effective_params(3), (2, 2));
        assert_eq!(h.effective_params(2), (2, 1));

        let defaulted = Hdbscan::new().with_min_cluster_size(8);
        assert_eq!(defaulted.effective_params(100), (8, 8));
    }

    #[test]
    fn empty_input() {
        let data: Vec<Vec<f32>> = vec![];
        assert!(matches!(
            Hdbscan::new().fit_predict(&data),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn invalid_min_samples_zero() {
        let data = vec![vec![0.0, 0.0]];
        let result = Hdbscan::new().with_min_samples(0).fit_predict(&data);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_min_cluster_size_zero() {
        let data = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let result = Hdbscan::new().with_min_cluster_size(0).fit_predict(&data);
        assert!(result.is_err());
    }

    #[test]
    fn large_min_samples_relative_to_data() {
        let data = make_cluster(&[0.0, 0.0], 10, 0.5);
        let labels = euclidean()
            .with_min_samples(100)
            .with_min_cluster_size(3)
            .fit_predict(&data)
            .unwrap();
        assert_eq!(labels.len(), 10);
    }

    #[test]
    fn labels_are_dense_and_meet_min_cluster_size() {
        let mut data = make_cluster(&[0.0, 0.0], 25, 0.5);
        data.extend(make_cluster(&[30.0, 30.0], 25, 0.5));
        data.extend(make_cluster(&[-30.0, 30.0], 25, 0.5));
        data.push(vec![15.0, 15.0]);

        let min_cluster_size = 5;
        let labels = euclidean()
            .with_min_samples(3)
            .with_min_cluster_size(min_cluster_size)
            .fit_predict(&data)
            .unwrap();

        let mut counts: HashMap<i32, usize> = HashMap::new();
        for &l in &labels {
            assert!(l >= NOISE);
            if l != NOISE {
                *counts.entry(l).or_insert(0) += 1;
            }
        }
        let k = counts.len() as i32;
        for (&label, &count) in &counts {
            assert!((0..k).contains(&label), "labels must be 0..{k}");
            assert!(
                count >= min_cluster_size,
                "label {label} has {count} points, expected at least {min_cluster_size}"
            );
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let mut data = make_cluster(&[0.0, 0.0], 20, 0.5);
        data.extend(make_cluster(&[9.0, 1.0], 20, 0.8));
        let h = euclidean().with_min_samples(3).with_min_cluster_size(5);
        assert_eq!(h.fit_predict(&data).unwrap(), h.fit_predict(&data).unwrap());
    }

    #[test]
    fn dimension_mismatch() {
        let data = vec![vec![0.0, 0.0], vec![1.0]];
        let result = Hdbscan::new().fit_predict(&data);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }
}
