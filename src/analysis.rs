//! Descriptive labels for analysed clusters.
//!
//! Labels are informational only. A labeller that fails is logged and the
//! cluster is simply left without a description.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cluster::RankedCluster;
use crate::embed::tokens;
use crate::error::Result;
use crate::table::{RecordTable, CLEANED_TEXT};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "in", "on", "at", "to",
    "for", "with", "by", "of", "as", "i", "my", "we", "our", "you", "your", "he", "she", "his",
    "her", "they", "their",
];

/// Description of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabel {
    pub cluster_id: i32,
    pub size: usize,
    pub score: f64,
    pub keywords: Vec<String>,
    pub top_categories: Vec<String>,
}

pub trait ClusterLabeler: Send + Sync {
    fn label(&self, cluster: &RankedCluster, records: &RecordTable) -> Result<ClusterLabel>;
}

/// Most frequent non-stop-word tokens, plus the dominant categories.
#[derive(Debug, Clone)]
pub struct KeywordLabeler {
    n_keywords: usize,
    category_column: String,
}

impl Default for KeywordLabeler {
    fn default() -> Self {
        Self {
            n_keywords: 10,
            category_column: "Category".to_string(),
        }
    }
}

impl KeywordLabeler {
    pub fn with_keywords(mut self, n: usize) -> Self {
        self.n_keywords = n;
        self
    }
}

impl ClusterLabeler for KeywordLabeler {
    fn label(&self, cluster: &RankedCluster, records: &RecordTable) -> Result<ClusterLabel> {
        let text_col = records.require_column(CLEANED_TEXT)?;
        let members = records.select(&cluster.indices)?;

        let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for text in members.values(text_col) {
            for tok in tokens(text) {
                if !stop.contains(tok.as_str()) {
                    *counts.entry(tok).or_default() += 1;
                }
            }
        }
        let keywords = most_common(counts, self.n_keywords);

        let top_categories = match members.column(&self.category_column) {
            Some(col) => {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for v in members.values(col).filter(|v| !v.is_empty()) {
                    *counts.entry(v.to_string()).or_default() += 1;
                }
                most_common(counts, 3)
            }
            None => Vec::new(),
        };

        Ok(ClusterLabel {
            cluster_id: cluster.cluster_id,
            size: cluster.size(),
            score: cluster.score,
            keywords,
            top_categories,
        })
    }
}

/// Label each cluster, dropping (and logging) failures.
pub fn label_clusters(
    labeler: &dyn ClusterLabeler,
    clusters: &[RankedCluster],
    records: &RecordTable,
) -> Vec<ClusterLabel> {
    clusters
        .iter()
        .filter_map(|c| match labeler.label(c, records) {
            Ok(label) => Some(label),
            Err(e) => {
                tracing::warn!(cluster = c.cluster_id, error = %e, "cluster labelling failed");
                None
            }
        })
        .collect()
}

// Count descending, then alphabetical.
fn most_common(counts: HashMap<String, usize>, n: usize) -> Vec<String> {
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.into_iter().take(n).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn records() -> RecordTable {
        RecordTable::new(
            vec![CLEANED_TEXT.into(), "Category".into()],
            vec![
                vec!["the python developer and python tester".into(), "IT".into()],
                vec!["Python data analyst".into(), "IT".into()],
                vec!["nurse at the hospital".into(), "HEALTHCARE".into()],
                vec!["python, sql".into(), "FINANCE".into()],
            ],
        )
        .unwrap()
    }

    fn cluster(indices: Vec<usize>) -> RankedCluster {
        RankedCluster {
            cluster_id: 7,
            score: 1.5,
            indices,
        }
    }

    #[test]
    fn keywords_skip_stop_words() {
        let label = KeywordLabeler::default()
            .with_keywords(3)
            .label(&cluster(vec![0, 1, 3]), &records())
            .unwrap();
        assert_eq!(label.keywords[0], "python");
        assert!(!label.keywords.iter().any(|k| k == "the" || k == "and"));
        assert_eq!(label.keywords.len(), 3);
        assert_eq!(label.top_categories, vec!["IT", "FINANCE"]);
        assert_eq!(label.size, 3);
    }

    #[test]
    fn missing_category_column_gives_no_categories() {
        let t = RecordTable::new(vec![CLEANED_TEXT.into()], vec![vec!["alpha beta".into()]])
            .unwrap();
        let label = KeywordLabeler::default().label(&cluster(vec![0]), &t).unwrap();
        assert!(label.top_categories.is_empty());
        assert_eq!(label.keywords, vec!["alpha", "beta"]);
    }

    struct Failing;
    impl ClusterLabeler for Failing {
        fn label(&self, _: &RankedCluster, _: &RecordTable) -> Result<ClusterLabel> {
            Err(Error::Other("service unavailable".into()))
        }
    }

    #[test]
    fn labeller_failure_is_dropped() {
        let labels = label_clusters(&Failing, &[cluster(vec![0])], &records());
        assert!(labels.is_empty());
    }
}
