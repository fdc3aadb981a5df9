use std::collections::BTreeSet;

use debias::cluster::{members, ClusterRanker, Clustering, Hdbscan, Metric, Score, NOISE};
use debias::partition::{Debiaser, SamplingScope};
use debias::reduce::{DimensionReducer, PcaReducer};
use proptest::prelude::*;

fn labels_strategy() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(-1i32..6, 0..60)
}

proptest! {
    #[test]
    fn prop_hdbscan_labels_are_noise_or_cluster(
        data in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 2), 1..40),
        min_cluster_size in 2usize..6,
    ) {
        let model = Hdbscan::new()
            .with_min_cluster_size(min_cluster_size)
            .with_metric(Metric::Euclidean);
        let labels = model.fit_predict(&data).unwrap();

        prop_assert_eq!(labels.len(), data.len());
        for &l in &labels {
            prop_assert!(l >= NOISE);
        }
    }

    #[test]
    fn prop_ranking_covers_each_cluster_once(labels in labels_strategy()) {
        let ranking = ClusterRanker::new(Score::Size, usize::MAX)
            .rank(&labels, &[], Metric::Euclidean)
            .unwrap();

        let expected: BTreeSet<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l != NOISE)
            .map(|(i, _)| i)
            .collect();
        let mut seen = BTreeSet::new();
        for c in &ranking.clusters {
            for &i in &c.indices {
                prop_assert!(seen.insert(i), "index {} ranked twice", i);
                prop_assert_eq!(labels[i], c.cluster_id);
            }
        }
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(ranking.total_clusters, members(&labels).len());
        for pair in ranking.clusters.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn prop_partition_is_disjoint_and_complete(
        labels in labels_strategy(),
        prune_count in 0usize..5,
        fraction in 0.0f64..=1.0,
        seed in any::<u64>(),
        pooled in any::<bool>(),
    ) {
        let scope = if pooled { SamplingScope::Pooled } else { SamplingScope::PerCluster };
        let debiaser = Debiaser::new(prune_count, fraction, seed).unwrap().with_scope(scope);
        let p = debiaser.partition(labels.len(), &labels).unwrap();

        prop_assert!(p.verify().is_ok());
        prop_assert_eq!(p.kept.len() + p.removed.len(), labels.len());
        for &i in &p.removed {
            prop_assert!(labels[i] != NOISE);
        }
        let removed: usize = p.clusters.iter().map(|c| c.removed).sum();
        prop_assert_eq!(removed, p.removed.len());
        prop_assert!(p.clusters.len() <= prune_count);
    }

    #[test]
    fn prop_partition_is_deterministic(labels in labels_strategy(), seed in any::<u64>()) {
        let debiaser = Debiaser::new(3, 0.5, seed).unwrap();
        let a = debiaser.partition(labels.len(), &labels).unwrap();
        let b = debiaser.partition(labels.len(), &labels).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_reduced_vectors_have_unit_norm(
        (data, k) in (2usize..12, 1usize..3).prop_flat_map(|(d, k)| {
            (
                prop::collection::vec(prop::collection::vec(-10.0f32..10.0, d), 8..30),
                Just(k.min(d)),
            )
        })
    ) {
        let reduced = PcaReducer::new(k).reduce(&data).unwrap();
        prop_assert_eq!(reduced.len(), data.len());
        for v in &reduced {
            prop_assert_eq!(v.len(), k);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            prop_assert!((norm - 1.0).abs() < 1e-5, "norm {}", norm);
        }
    }
}
