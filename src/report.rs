//! Job summary: `debiased/summary.json` for machines, `summary.txt` for people.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::{Metric, RankedCluster, Score};
use crate::error::Result;
use crate::partition::{ClusterRemoval, Partition, SamplingScope};
use crate::store::VectorStore;
use crate::table::RecordTable;

pub const SUMMARY_JSON: &str = "summary.json";
pub const SUMMARY_TXT: &str = "summary.txt";

/// Everything a finished job reports about its run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub job_id: String,
    /// UTC, RFC 3339.
    pub generated_at: String,
    /// Rows in the input table.
    pub n_records: usize,
    pub clustering: ClusteringSummary,
    /// Clusters selected for analysis, best first.
    pub analysed: Vec<AnalysedCluster>,
    pub partition: PartitionSummary,
    pub reduction: ReductionSummary,
    /// Files under the job directory, present or not.
    pub artifacts: Vec<ArtifactInfo>,
}

/// Parameters and outcome of the clustering stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringSummary {
    pub metric: Metric,
    /// Effective value, after small-dataset clamping or the relaxed retry.
    pub min_cluster_size: usize,
    /// Effective value, after small-dataset clamping or the relaxed retry.
    pub min_samples: usize,
    pub n_clusters: usize,
    pub noise_count: usize,
    pub noise_percent: f64,
    /// Whether the relaxed-parameter retry ran.
    pub retried: bool,
    /// Members per cluster id; noise is not listed.
    pub cluster_sizes: BTreeMap<i32, usize>,
}

/// A cluster that received per-cluster artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysedCluster {
    pub cluster_id: i32,
    pub size: usize,
    pub score_kind: Score,
    pub score: f64,
}

impl AnalysedCluster {
    /// Summary entry for one ranked cluster.
    pub fn from_ranked(c: &RankedCluster, score_kind: Score) -> Self {
        Self {
            cluster_id: c.cluster_id,
            size: c.size(),
            score_kind,
            score: c.score,
        }
    }
}

/// Settings and counts of the partitioning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub scope: SamplingScope,
    pub prune_count: usize,
    pub removal_fraction: f64,
    pub seed: u64,
    pub kept: usize,
    pub removed: usize,
    /// Removed share of all records.
    pub removed_percent: f64,
    pub clusters: Vec<ClusterRemoval>,
}

impl PartitionSummary {
    /// Counts from `partition` alongside the settings that produced it.
    pub fn new(
        partition: &Partition,
        scope: SamplingScope,
        prune_count: usize,
        removal_fraction: f64,
        seed: u64,
    ) -> Self {
        Self {
            scope,
            prune_count,
            removal_fraction,
            seed,
            kept: partition.kept.len(),
            removed: partition.removed.len(),
            removed_percent: partition.removed_percent(),
            clusters: partition.clusters.clone(),
        }
    }
}

/// Outcome of the reduction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReductionSummary {
    /// Reduced vectors were written.
    Done {
        n_components: usize,
        explained_variance_ratio: Vec<f64>,
    },
    /// No reduced vectors exist for this job.
    Skipped {
        reason: String,
    },
}

/// Size and shape of one file under the job directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Relative to the job directory.
    pub path: PathBuf,
    pub exists: bool,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

impl ArtifactInfo {
    /// Inspect `job_dir/rel`. Unreadable contents leave shape/rows empty.
    pub fn inspect(job_dir: &Path, rel: &Path) -> Self {
        let full = job_dir.join(rel);
        let Ok(meta) = fs::metadata(&full) else {
            return Self {
                path: rel.to_path_buf(),
                exists: false,
                bytes: 0,
                shape: None,
                rows: None,
            };
        };
        let ext = full.extension().and_then(|e| e.to_str());
        let shape = match ext {
            Some("npy") => VectorStore::read_npy(&full)
                .ok()
                .map(|s| (s.len(), s.dim())),
            _ => None,
        };
        let rows = match ext {
            Some("csv") => RecordTable::read_csv(&full).ok().map(|t| t.len()),
            _ => None,
        };
        Self {
            path: rel.to_path_buf(),
            exists: true,
            bytes: meta.len(),
            shape,
            rows,
        }
    }
}

impl Summary {
    /// Write `summary.json` and `summary.txt` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(SUMMARY_JSON), serde_json::to_string_pretty(self)?)?;
        fs::write(dir.join(SUMMARY_TXT), self.render_text())?;
        Ok(())
    }

    /// Read a `summary.json`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(crate::error::Error::ArtifactMissing(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Human-readable report.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let p = &self.partition;
        let c = &self.clustering;

        let _ = writeln!(out, "DEBIASED DATASET SUMMARY");
        let _ = writeln!(out, "========================");
        let _ = writeln!(out, "Job ID: {}", self.job_id);
        let _ = writeln!(out, "Generated: {}", self.generated_at);

        let _ = writeln!(out, "\n-- Counts --");
        let _ = writeln!(out, "Original records: {}", self.n_records);
        let _ = writeln!(out, "Kept records: {}", p.kept);
        let _ = writeln!(out, "Removed records: {}", p.removed);
        let _ = writeln!(out, "Overall removal percentage: {:.2}%", p.removed_percent);

        let _ = writeln!(out, "\n-- Clustering --");
        let _ = writeln!(
            out,
            "Metric: {}, min_cluster_size: {}, min_samples: {}{}",
            c.metric,
            c.min_cluster_size,
            c.min_samples,
            if c.retried { " (relaxed retry)" } else { "" }
        );
        let _ = writeln!(
            out,
            "Clusters: {}, noise points: {} ({:.1}%)",
            c.n_clusters, c.noise_count, c.noise_percent
        );
        for a in &self.analysed {
            let _ = writeln!(
                out,
                "  Analysed cluster {}: size={}, {:?} score={:.4}",
                a.cluster_id, a.size, a.score_kind, a.score
            );
        }

        let _ = writeln!(out, "\n-- Pruning ({:?}, fraction {}, seed {}) --", p.scope, p.removal_fraction, p.seed);
        if p.clusters.is_empty() {
            let _ = writeln!(out, "No clusters were selected for pruning.");
        }
        for r in &p.clusters {
            let _ = write!(
                out,
                "  Cluster {}: Original Size={}, Removed={} ({:.1}%), Remaining={}",
                r.cluster_id,
                r.original_size,
                r.removed,
                r.removed_percent(),
                r.remaining()
            );
            if let Some(reason) = r.skipped {
                let _ = write!(out, " [skipped: {reason:?}]");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "\n-- Reduction --");
        match &self.reduction {
            ReductionSummary::Done {
                n_components,
                explained_variance_ratio,
            } => {
                let ratios: Vec<String> = explained_variance_ratio
                    .iter()
                    .map(|r| format!("{r:.4}"))
                    .collect();
                let _ = writeln!(
                    out,
                    "{n_components} components, explained variance ratio [{}]",
                    ratios.join(", ")
                );
            }
            ReductionSummary::Skipped { reason } => {
                let _ = writeln!(out, "Skipped: {reason}");
            }
        }

        let _ = writeln!(out, "\n-- Files --");
        for a in &self.artifacts {
            let name = a.path.display().to_string();
            if !a.exists {
                let _ = writeln!(out, "{name:<40} | --- not written ---");
                continue;
            }
            let detail = match (a.shape, a.rows) {
                (Some((r, d)), _) => format!("Shape: ({r}, {d})"),
                (None, Some(rows)) => format!("Rows: {rows}"),
                (None, None) => String::new(),
            };
            let _ = writeln!(
                out,
                "{name:<40} | {detail:<20} | Size: {:.2} MB",
                a.bytes as f64 / (1024.0 * 1024.0)
            );
        }
        out
    }
}

/// Current UTC time, RFC 3339.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
