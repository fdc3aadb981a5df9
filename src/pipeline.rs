//! Job orchestration.
//!
//! A job runs `PENDING → EMBEDDING → CLUSTERING → REDUCING → PARTITIONING →
//! DONE`; any stage error moves it to `FAILED` with the stage and message
//! recorded. Progress and diagnostics are persisted to `status.json` after
//! every transition so another process can poll the job.
//!
//! Everything a job writes lives under its own directory:
//!
//! ```text
//! <job_dir>/
//!   status.json
//!   records.csv                     cleaned input with original_index
//!   vectors.npy (+ .meta.json)      one row per record
//!   clusters/all_clusters.csv       every record with its cluster label
//!   clusters/cluster_<id>.csv       analysed clusters
//!   clusters/cluster_<id>_reduced.npy
//!   clusters/analysis.json          keyword / category labels
//!   reduced/all_reduced.npy (+ .meta.json, pca.json)
//!   debiased/{kept,removed}.csv
//!   debiased/{kept,removed}_vectors.npy
//!   debiased/{kept,removed}_reduced.npy
//!   debiased/summary.{json,txt}
//! ```
//!
//! Vectors and reduced vectors are reused across runs when their fingerprint
//! still matches; a cached artifact whose row count disagrees with the
//! record table is discarded and recomputed. Vectors supplied by the caller
//! are never corrected: a count mismatch fails the job before clustering.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::{label_clusters, ClusterLabeler, KeywordLabeler};
use crate::cluster::{
    cluster_count, members, noise_count, ClusterRanker, DistanceMatrix, Hdbscan, Metric, Ranking,
    Score,
};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::partition::{Debiaser, Partition, SamplingScope};
use crate::reduce::{PcaModel, PcaReducer};
use crate::report::{
    timestamp, AnalysedCluster, ArtifactInfo, ClusteringSummary, PartitionSummary,
    ReductionSummary, Summary,
};
use crate::store::{discard, CacheStatus, VectorStore};
use crate::table::RecordTable;

/// Status file name inside a job directory.
pub const STATUS_FILE: &str = "status.json";

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Embedding,
    Clustering,
    Reducing,
    Partitioning,
    Done,
    Failed,
}

impl JobState {
    /// `DONE` or `FAILED`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Embedding => "EMBEDDING",
            JobState::Clustering => "CLUSTERING",
            JobState::Reducing => "REDUCING",
            JobState::Partitioning => "PARTITIONING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// One line of a job's diagnostic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// UTC, RFC 3339.
    pub at: String,
    pub level: Level,
    /// Stage the job was in when the line was recorded.
    pub stage: JobState,
    pub message: String,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that was running.
    pub stage: JobState,
    /// Display form of the error.
    pub message: String,
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    /// Current state, terminal once the run returns.
    pub state: JobState,
    /// Last stage entered; stays put when the job reaches a terminal state.
    pub stage: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// UTC, RFC 3339.
    pub updated_at: String,
}

impl JobStatus {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Pending,
            stage: JobState::Pending,
            error: None,
            diagnostics: Vec::new(),
            updated_at: timestamp(),
        }
    }

    /// Read `status.json` from a job directory.
    pub fn load(job_dir: &Path) -> Result<Self> {
        let path = job_dir.join(STATUS_FILE);
        if !path.exists() {
            return Err(Error::ArtifactMissing(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Diagnostics containing `needle`, for quick checks.
    pub fn mentions(&self, needle: &str) -> bool {
        self.diagnostics.iter().any(|d| d.message.contains(needle))
    }
}

/// Everything one job needs; no process-wide state is consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub job_id: String,
    /// Directory owned by this job; every artifact is written below it.
    pub job_dir: PathBuf,
    /// Input column holding the text to embed.
    pub text_column: String,
    pub min_cluster_size: usize,
    /// Defaults to `min_cluster_size` when unset.
    pub min_samples: Option<usize>,
    /// Used for clustering and for the density score.
    pub metric: Metric,
    /// Retry once with halved parameters when no cluster is found.
    pub retry_relaxed: bool,
    /// Score used to pick the clusters that get per-cluster artifacts.
    pub analyze_score: Score,
    /// Number of clusters that get per-cluster artifacts.
    pub top_k: usize,
    /// Output dimensionality of the reduction stage.
    pub n_components: usize,
    /// Number of largest clusters to thin out.
    pub prune_count: usize,
    /// Fraction of each pruned cluster to remove, in `[0, 1]`.
    pub removal_fraction: f64,
    pub seed: u64,
    pub scope: SamplingScope,
}

impl JobConfig {
    /// Defaults for everything but identity and location.
    pub fn new(job_id: impl Into<String>, job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            job_dir: job_dir.into(),
            text_column: "text".to_string(),
            min_cluster_size: 5,
            min_samples: None,
            metric: Metric::default(),
            retry_relaxed: true,
            analyze_score: Score::Density,
            top_k: 3,
            n_components: crate::reduce::DEFAULT_COMPONENTS,
            prune_count: 3,
            removal_fraction: 0.5,
            seed: 42,
            scope: SamplingScope::PerCluster,
        }
    }
}

/// Artifact paths of one job directory.
#[derive(Debug, Clone)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    pub fn records(&self) -> PathBuf {
        self.root.join("records.csv")
    }

    pub fn vectors(&self) -> PathBuf {
        self.root.join("vectors.npy")
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.root.join("clusters")
    }

    pub fn all_clusters(&self) -> PathBuf {
        self.clusters_dir().join("all_clusters.csv")
    }

    pub fn cluster_csv(&self, id: i32) -> PathBuf {
        self.clusters_dir().join(format!("cluster_{id}.csv"))
    }

    pub fn cluster_reduced(&self, id: i32) -> PathBuf {
        self.clusters_dir().join(format!("cluster_{id}_reduced.npy"))
    }

    /// Remove every `cluster_<id>.csv` and `cluster_<id>_reduced.npy`,
    /// returning how many files were deleted.
    pub fn clear_cluster_files(&self) -> Result<usize> {
        let entries = match fs::read_dir(self.clusters_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("cluster_") && (name.ends_with(".csv") || name.ends_with("_reduced.npy")) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn analysis(&self) -> PathBuf {
        self.clusters_dir().join("analysis.json")
    }

    pub fn reduced(&self) -> PathBuf {
        self.root.join("reduced").join("all_reduced.npy")
    }

    pub fn pca_model(&self) -> PathBuf {
        self.root.join("reduced").join("pca.json")
    }

    pub fn debiased_dir(&self) -> PathBuf {
        self.root.join("debiased")
    }

    pub fn debiased(&self, name: &str) -> PathBuf {
        self.debiased_dir().join(name)
    }

    pub fn summary_json(&self) -> PathBuf {
        self.debiased(crate::report::SUMMARY_JSON)
    }

    pub fn summary_txt(&self) -> PathBuf {
        self.debiased(crate::report::SUMMARY_TXT)
    }

    fn reported(&self) -> Vec<PathBuf> {
        let rel = |p: PathBuf| p.strip_prefix(&self.root).map(Path::to_path_buf).unwrap_or(p);
        let mut paths = vec![
            rel(self.records()),
            rel(self.vectors()),
            rel(self.all_clusters()),
            rel(self.reduced()),
        ];
        for name in DEBIASED_FILES {
            paths.push(rel(self.debiased(name)));
        }
        paths
    }
}

const DEBIASED_FILES: [&str; 6] = [
    "kept.csv",
    "removed.csv",
    "kept_vectors.npy",
    "removed_vectors.npy",
    "kept_reduced.npy",
    "removed_reduced.npy",
];

struct ClusteringOutcome {
    labels: Vec<i32>,
    min_cluster_size: usize,
    min_samples: usize,
    retried: bool,
    analysed: Ranking,
}

struct ReductionOutcome {
    store: Option<VectorStore>,
    summary: ReductionSummary,
}

/// Runs one job end to end.
pub struct Pipeline {
    config: JobConfig,
    layout: JobLayout,
    embedder: Box<dyn Embedder>,
    labeler: Box<dyn ClusterLabeler>,
    status: JobStatus,
}

impl Pipeline {
    pub fn new(config: JobConfig, embedder: Box<dyn Embedder>) -> Self {
        let layout = JobLayout::new(config.job_dir.clone());
        let status = JobStatus::new(&config.job_id);
        Self {
            config,
            layout,
            embedder,
            labeler: Box::new(KeywordLabeler::default()),
            status,
        }
    }

    /// Replace the default [`KeywordLabeler`].
    pub fn with_labeler(mut self, labeler: Box<dyn ClusterLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    /// Status as of the last transition.
    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Run the job on the CSV at `input`, embedding its text column.
    pub fn run(&mut self, input: &Path) -> Result<Summary> {
        self.execute(input, None)
    }

    /// Run the job with precomputed vectors instead of embedding.
    pub fn run_with_vectors(&mut self, input: &Path, vectors: &Path) -> Result<Summary> {
        self.execute(input, Some(vectors))
    }

    fn execute(&mut self, input: &Path, supplied: Option<&Path>) -> Result<Summary> {
        fs::create_dir_all(self.layout.root())?;
        self.status = JobStatus::new(&self.config.job_id);
        self.note(Level::Info, format!("job started on {}", input.display()));
        self.persist()?;

        match self.stages(input, supplied) {
            Ok(summary) => {
                self.status.state = JobState::Done;
                self.note(Level::Info, "job complete");
                self.persist()?;
                Ok(summary)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn stages(&mut self, input: &Path, supplied: Option<&Path>) -> Result<Summary> {
        let (records, text_col) = self.load_records(input)?;

        self.enter(JobState::Embedding)?;
        let vectors = self.embed(&records, text_col, supplied)?;

        self.enter(JobState::Clustering)?;
        let clustering = self.cluster(&records, &vectors)?;

        self.enter(JobState::Reducing)?;
        let reduction = self.reduce(&vectors, &clustering)?;

        self.enter(JobState::Partitioning)?;
        let partition = self.partition(&records, &vectors, reduction.store.as_ref(), &clustering)?;

        let summary = self.summarize(records.len(), &clustering, &partition, reduction.summary);
        summary.write(&self.layout.debiased_dir())?;
        Ok(summary)
    }

    fn load_records(&mut self, input: &Path) -> Result<(RecordTable, usize)> {
        let mut records = RecordTable::read_input(input)?;
        if records.is_empty() {
            return Err(Error::InputInvalid("dataset has no rows".to_string()));
        }
        let text_col = records.clean_column(&self.config.text_column)?;
        records.write_csv(&self.layout.records())?;
        self.note(Level::Info, format!("loaded {} records", records.len()));
        Ok((records, text_col))
    }

    fn embed(
        &mut self,
        records: &RecordTable,
        text_col: usize,
        supplied: Option<&Path>,
    ) -> Result<VectorStore> {
        let n = records.len();
        let path = self.layout.vectors();

        if let Some(supplied) = supplied {
            let store = VectorStore::read_npy(supplied)?;
            if store.len() != n {
                return Err(Error::CountMismatch {
                    artifact: supplied.display().to_string(),
                    expected: n,
                    found: store.len(),
                });
            }
            store.save(&path, Some(format!("supplied:{}", records.digest(text_col))))?;
            self.note(
                Level::Info,
                format!("using {} supplied vectors (dim {})", store.len(), store.dim()),
            );
            return Ok(store);
        }

        let source = format!("{}:{}", self.embedder.id(), records.digest(text_col));
        match VectorStore::load_cached(&path, n, Some(&source))? {
            CacheStatus::Valid(store) => {
                self.note(Level::Info, format!("reusing cached vectors ({} rows)", store.len()));
                return Ok(store);
            }
            CacheStatus::Missing => {}
            CacheStatus::CountMismatch { expected, found } => {
                self.note(
                    Level::Warn,
                    format!("discarding cached vectors: {found} rows for {expected} records"),
                );
                discard(&path)?;
            }
            CacheStatus::Stale(reason) => {
                self.note(Level::Warn, format!("discarding cached vectors: {reason}"));
                discard(&path)?;
            }
        }

        let texts: Vec<&str> = records.values(text_col).collect();
        let rows = self.embedder.embed_batch(&texts)?;
        let dim = self.embedder.dim();
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
        let store = VectorStore::from_rows(rows)?;
        if store.len() != n {
            return Err(Error::CountMismatch {
                artifact: "embedder output".to_string(),
                expected: n,
                found: store.len(),
            });
        }
        store.save(&path, Some(source))?;
        self.note(Level::Info, format!("embedded {n} records (dim {dim})"));
        Ok(store)
    }

    fn cluster(&mut self, records: &RecordTable, vectors: &VectorStore) -> Result<ClusteringOutcome> {
        let n = vectors.len();
        if records.len() != n {
            return Err(Error::CountMismatch {
                artifact: "vectors".to_string(),
                expected: records.len(),
                found: n,
            });
        }
        let metric = self.config.metric;
        let dists = DistanceMatrix::compute(vectors.rows(), metric);

        let mut hdbscan = Hdbscan::new()
            .with_min_cluster_size(self.config.min_cluster_size)
            .with_metric(metric);
        if let Some(ms) = self.config.min_samples {
            hdbscan = hdbscan.with_min_samples(ms);
        }
        let (mut min_cluster_size, mut min_samples) = hdbscan.effective_params(n);
        let mut labels = hdbscan.fit_predict_distances(&dists)?;
        let mut retried = false;

        if cluster_count(&labels) == 0 {
            self.note(
                Level::Warn,
                Error::ClusteringDegenerate { n_points: n }.to_string(),
            );
            let relaxed_mcs = (min_cluster_size / 2).max(2);
            let relaxed_ms = (min_samples / 2).max(1);
            let changed = (relaxed_mcs, relaxed_ms) != (min_cluster_size, min_samples);
            if self.config.retry_relaxed && changed {
                let relaxed = Hdbscan::new()
                    .with_min_cluster_size(relaxed_mcs)
                    .with_min_samples(relaxed_ms)
                    .with_metric(metric);
                labels = relaxed.fit_predict_distances(&dists)?;
                (min_cluster_size, min_samples) = relaxed.effective_params(n);
                retried = true;
                self.note(
                    Level::Info,
                    format!(
                        "retried with min_cluster_size={min_cluster_size}, min_samples={min_samples}: {} clusters",
                        cluster_count(&labels)
                    ),
                );
            }
            if cluster_count(&labels) == 0 {
                self.note(Level::Warn, "continuing with every record labelled noise");
            }
        }

        let n_clusters = cluster_count(&labels);
        let noise = noise_count(&labels);
        self.note(
            Level::Info,
            format!(
                "{n_clusters} clusters, {noise} noise points ({:.1}%)",
                percent(noise, n)
            ),
        );
        let stale = self.layout.clear_cluster_files()?;
        if stale > 0 {
            tracing::debug!(job = %self.config.job_id, stale, "removed per-cluster files from a previous run");
        }
        records.write_with_labels(&self.layout.all_clusters(), &labels)?;

        let analysed = ClusterRanker::new(self.config.analyze_score, self.config.top_k).rank(
            &labels,
            vectors.rows(),
            metric,
        )?;
        if analysed.partial {
            self.note(
                Level::Info,
                format!(
                    "only {} clusters available for analysis (requested {})",
                    analysed.total_clusters, self.config.top_k
                ),
            );
        }
        for c in &analysed.clusters {
            let written = records
                .select(&c.indices)
                .and_then(|sub| sub.write_csv(&self.layout.cluster_csv(c.cluster_id)));
            if let Err(e) = written {
                self.note(Level::Warn, format!("cluster {} file not written: {e}", c.cluster_id));
            }
        }

        let labels_out = label_clusters(self.labeler.as_ref(), &analysed.clusters, records);
        let analysis = serde_json::to_string_pretty(&labels_out)
            .map_err(Error::from)
            .and_then(|json| fs::write(self.layout.analysis(), json).map_err(Error::from));
        if let Err(e) = analysis {
            self.note(Level::Warn, format!("cluster analysis not written: {e}"));
        }

        Ok(ClusteringOutcome {
            labels,
            min_cluster_size,
            min_samples,
            retried,
            analysed,
        })
    }

    fn reduce(&mut self, vectors: &VectorStore, clustering: &ClusteringOutcome) -> Result<ReductionOutcome> {
        let n = vectors.len();
        let k = self.config.n_components;
        let path = self.layout.reduced();
        let model_path = self.layout.pca_model();
        let source = format!("pca-k{k}:{}", vectors.fingerprint(None).digest);

        let mut cached = None;
        match VectorStore::load_cached(&path, n, Some(&source))? {
            CacheStatus::Valid(store) => {
                let model: Option<PcaModel> = fs::read_to_string(&model_path)
                    .ok()
                    .and_then(|json| serde_json::from_str(&json).ok());
                match model {
                    Some(model) => cached = Some((store, model)),
                    None => {
                        self.note(Level::Warn, "discarding cached reduced vectors: no projection model");
                        discard(&path)?;
                    }
                }
            }
            CacheStatus::Missing => {}
            CacheStatus::CountMismatch { expected, found } => {
                self.note(
                    Level::Warn,
                    format!("discarding cached reduced vectors: {found} rows for {expected} records"),
                );
                discard(&path)?;
            }
            CacheStatus::Stale(reason) => {
                self.note(Level::Warn, format!("discarding cached reduced vectors: {reason}"));
                discard(&path)?;
            }
        }

        let (store, model) = match cached {
            Some(pair) => {
                self.note(Level::Info, "reusing cached reduced vectors");
                pair
            }
            None => match PcaReducer::new(k).fit(vectors.rows()) {
                Ok(model) => {
                    let store = VectorStore::from_rows(model.transform(vectors.rows())?)?;
                    store.save(&path, Some(source))?;
                    fs::write(&model_path, serde_json::to_string_pretty(&model)?)?;
                    self.note(Level::Info, format!("reduced {n} vectors to {k} components"));
                    (store, model)
                }
                Err(e @ (Error::ReductionSkipped { .. } | Error::ReductionTooNarrow { .. })) => {
                    self.note(Level::Warn, e.to_string());
                    discard(&path)?;
                    return Ok(ReductionOutcome {
                        store: None,
                        summary: ReductionSummary::Skipped {
                            reason: e.to_string(),
                        },
                    });
                }
                Err(e) => return Err(e),
            },
        };

        for c in &clustering.analysed.clusters {
            let written = store
                .select(&c.indices)
                .and_then(|sub| sub.write_npy(&self.layout.cluster_reduced(c.cluster_id)));
            if let Err(e) = written {
                self.note(
                    Level::Warn,
                    format!("cluster {} reduced vectors not written: {e}", c.cluster_id),
                );
            }
        }

        Ok(ReductionOutcome {
            store: Some(store),
            summary: ReductionSummary::Done {
                n_components: model.n_components(),
                explained_variance_ratio: model.explained_variance_ratio.clone(),
            },
        })
    }

    fn partition(
        &mut self,
        records: &RecordTable,
        vectors: &VectorStore,
        reduced: Option<&VectorStore>,
        clustering: &ClusteringOutcome,
    ) -> Result<Partition> {
        let debiaser = Debiaser::new(
            self.config.prune_count,
            self.config.removal_fraction,
            self.config.seed,
        )?
        .with_scope(self.config.scope);
        let partition = debiaser.partition(records.len(), &clustering.labels)?;
        for c in &partition.clusters {
            if let Some(reason) = c.skipped {
                self.note(
                    Level::Warn,
                    format!("cluster {} skipped for pruning: {reason:?}", c.cluster_id),
                );
            }
        }

        let (kept, removed) = partition.split(records, vectors, reduced)?;
        kept.records.write_csv(&self.layout.debiased("kept.csv"))?;
        removed.records.write_csv(&self.layout.debiased("removed.csv"))?;
        kept.vectors.write_npy(&self.layout.debiased("kept_vectors.npy"))?;
        removed.vectors.write_npy(&self.layout.debiased("removed_vectors.npy"))?;
        match (&kept.reduced, &removed.reduced) {
            (Some(k), Some(r)) => {
                k.write_npy(&self.layout.debiased("kept_reduced.npy"))?;
                r.write_npy(&self.layout.debiased("removed_reduced.npy"))?;
            }
            _ => {
                discard(&self.layout.debiased("kept_reduced.npy"))?;
                discard(&self.layout.debiased("removed_reduced.npy"))?;
            }
        }

        self.note(
            Level::Info,
            format!(
                "kept {} records, removed {} ({:.2}%)",
                partition.kept.len(),
                partition.removed.len(),
                partition.removed_percent()
            ),
        );
        Ok(partition)
    }

    fn summarize(
        &self,
        n_records: usize,
        clustering: &ClusteringOutcome,
        partition: &Partition,
        reduction: ReductionSummary,
    ) -> Summary {
        let labels = &clustering.labels;
        let noise = noise_count(labels);
        let cluster_sizes = members(labels)
            .into_iter()
            .map(|(id, idx)| (id, idx.len()))
            .collect();
        let score_kind = self.config.analyze_score;
        let artifacts = self
            .layout
            .reported()
            .iter()
            .map(|rel| ArtifactInfo::inspect(self.layout.root(), rel))
            .collect();

        Summary {
            job_id: self.config.job_id.clone(),
            generated_at: timestamp(),
            n_records,
            clustering: ClusteringSummary {
                metric: self.config.metric,
                min_cluster_size: clustering.min_cluster_size,
                min_samples: clustering.min_samples,
                n_clusters: cluster_count(labels),
                noise_count: noise,
                noise_percent: percent(noise, n_records),
                retried: clustering.retried,
                cluster_sizes,
            },
            analysed: clustering
                .analysed
                .clusters
                .iter()
                .map(|c| AnalysedCluster::from_ranked(c, score_kind))
                .collect(),
            partition: PartitionSummary::new(
                partition,
                self.config.scope,
                self.config.prune_count,
                self.config.removal_fraction,
                self.config.seed,
            ),
            reduction,
            artifacts,
        }
    }

    fn enter(&mut self, stage: JobState) -> Result<()> {
        self.status.state = stage;
        self.status.stage = stage;
        tracing::info!(job = %self.config.job_id, %stage, "entering stage");
        self.persist()
    }

    fn fail(&mut self, e: &Error) {
        let stage = self.status.stage;
        self.status.error = Some(StageError {
            stage,
            message: e.to_string(),
        });
        self.status.state = JobState::Failed;
        self.note(Level::Error, format!("{stage} failed: {e}"));
        if let Err(write_err) = self.persist() {
            tracing::error!(job = %self.config.job_id, error = %write_err, "could not write job status");
        }
    }

    fn note(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        let stage = self.status.stage;
        match level {
            Level::Info => tracing::info!(job = %self.config.job_id, %stage, "{message}"),
            Level::Warn => tracing::warn!(job = %self.config.job_id, %stage, "{message}"),
            Level::Error => tracing::error!(job = %self.config.job_id, %stage, "{message}"),
        }
        self.status.diagnostics.push(Diagnostic {
            at: timestamp(),
            level,
            stage,
            message,
        });
    }

    fn persist(&mut self) -> Result<()> {
        self.status.updated_at = timestamp();
        let json = serde_json::to_string_pretty(&self.status)?;
        // Write then rename so pollers never see a half-written file.
        let tmp = self.layout.status().with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.layout.status())?;
        Ok(())
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
