//! Layered configuration.
//!
//! Sources, later ones winning:
//! - built-in defaults
//! - a TOML file (`debias.toml` unless another path is given)
//! - environment variables prefixed `DEBIAS_`
//!
//! Nested keys use a double underscore:
//! - `DEBIAS_PARTITION__SEED=7` sets `partition.seed`
//! - `DEBIAS_CLUSTERING__METRIC=euclidean` sets `clustering.metric`
//! - `DEBIAS_TEXT_COLUMN=body` sets `text_column`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cluster::{Metric, Score};
use crate::error::Result;
use crate::partition::SamplingScope;
use crate::pipeline::JobConfig;

pub const DEFAULT_CONFIG_FILE: &str = "debias.toml";
const ENV_PREFIX: &str = "DEBIAS_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory under which each job gets its own subdirectory.
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,
    /// Column of the input table holding the text to embed.
    #[serde(default = "default_text_column")]
    pub text_column: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub reduction: ReductionConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dim")]
    pub dim: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Defaults to `min_cluster_size` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
    #[serde(default)]
    pub metric: Metric,
    /// Retry once with relaxed parameters when everything is noise.
    #[serde(default = "default_true")]
    pub retry_relaxed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Score used to pick clusters for analysis.
    #[serde(default)]
    pub analyze_score: Score,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(default = "default_n_components")]
    pub n_components: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default = "default_prune_count")]
    pub prune_count: usize,
    #[serde(default = "default_removal_fraction")]
    pub removal_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub scope: SamplingScope,
}

/// Log filter configuration.
///
/// ```toml
/// [logging]
/// default = "info"
///
/// [logging.modules]
/// "debias::cluster" = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_jobs_root() -> PathBuf {
    PathBuf::from("jobs")
}
fn default_text_column() -> String {
    "text".to_string()
}
fn default_dim() -> usize {
    crate::embed::DEFAULT_DIM
}
fn default_min_cluster_size() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_top_k() -> usize {
    3
}
fn default_n_components() -> usize {
    crate::reduce::DEFAULT_COMPONENTS
}
fn default_prune_count() -> usize {
    3
}
fn default_removal_fraction() -> f64 {
    0.5
}
fn default_seed() -> u64 {
    42
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            text_column: default_text_column(),
            embedding: EmbeddingConfig::default(),
            clustering: ClusteringConfig::default(),
            ranking: RankingConfig::default(),
            reduction: ReductionConfig::default(),
            partition: PartitionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dim: default_dim() }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            min_samples: None,
            metric: Metric::default(),
            retry_relaxed: true,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            analyze_score: Score::default(),
            top_k: default_top_k(),
        }
    }
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            n_components: default_n_components(),
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            prune_count: default_prune_count(),
            removal_fraction: default_removal_fraction(),
            seed: default_seed(),
            scope: SamplingScope::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load from defaults, `path` (or `debias.toml`), and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Ok(Self::figment(path, ENV_PREFIX)
            .extract()
            .map_err(Box::new)?)
    }

    fn figment(path: &Path, prefix: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(
                Env::prefixed(prefix)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Per-job configuration rooted at `jobs_root/job_id`.
    pub fn job_config(&self, job_id: &str) -> JobConfig {
        JobConfig {
            job_id: job_id.to_string(),
            job_dir: self.jobs_root.join(job_id),
            text_column: self.text_column.clone(),
            min_cluster_size: self.clustering.min_cluster_size,
            min_samples: self.clustering.min_samples,
            metric: self.clustering.metric,
            retry_relaxed: self.clustering.retry_relaxed,
            analyze_score: self.ranking.analyze_score,
            top_k: self.ranking.top_k,
            n_components: self.reduction.n_components,
            prune_count: self.partition.prune_count,
            removal_fraction: self.partition.removal_fraction,
            seed: self.partition.seed,
            scope: self.partition.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.clustering.min_cluster_size, 5);
        assert_eq!(s.clustering.min_samples, None);
        assert_eq!(s.clustering.metric, Metric::Cosine);
        assert_eq!(s.ranking.analyze_score, Score::Density);
        assert_eq!(s.ranking.top_k, 3);
        assert_eq!(s.reduction.n_components, 6);
        assert_eq!(s.partition.prune_count, 3);
        assert_eq!(s.partition.removal_fraction, 0.5);
        assert_eq!(s.partition.seed, 42);
        assert_eq!(s.partition.scope, SamplingScope::PerCluster);
        assert_eq!(s.logging.default, "info");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s: Settings = Settings::figment(&dir.path().join("none.toml"), "DEBIAS_TEST_NONE_")
            .extract()
            .unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debias.toml");
        std::fs::write(
            &path,
            r#"
text_column = "Resume_str"

[clustering]
min_cluster_size = 15
min_samples = 5
metric = "euclidean"

[partition]
scope = "pooled"

[logging.modules]
"debias::cluster" = "debug"
"#,
        )
        .unwrap();
        let s: Settings = Settings::figment(&path, "DEBIAS_TEST_TOML_").extract().unwrap();
        assert_eq!(s.text_column, "Resume_str");
        assert_eq!(s.clustering.min_cluster_size, 15);
        assert_eq!(s.clustering.min_samples, Some(5));
        assert_eq!(s.clustering.metric, Metric::Euclidean);
        assert_eq!(s.partition.scope, SamplingScope::Pooled);
        assert_eq!(s.partition.seed, 42);
        assert_eq!(s.logging.modules["debias::cluster"], "debug");
    }

    #[test]
    fn env_overrides_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("DEBIAS_TEST_ENV_PARTITION__SEED", "7");
        std::env::set_var("DEBIAS_TEST_ENV_TEXT_COLUMN", "body");
        let s: Settings = Settings::figment(&dir.path().join("none.toml"), "DEBIAS_TEST_ENV_")
            .extract()
            .unwrap();
        std::env::remove_var("DEBIAS_TEST_ENV_PARTITION__SEED");
        std::env::remove_var("DEBIAS_TEST_ENV_TEXT_COLUMN");
        assert_eq!(s.partition.seed, 7);
        assert_eq!(s.text_column, "body");
    }

    #[test]
    fn job_config_is_rooted_under_jobs_root() {
        let s = Settings::default();
        let job = s.job_config("abc");
        assert_eq!(job.job_dir, PathBuf::from("jobs").join("abc"));
        assert_eq!(job.prune_count, 3);
    }
}
