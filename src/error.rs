use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the clustering and debiasing pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Points in a dataset have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// The source table is unusable (missing text column, no rows, bad cells).
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// An upstream artifact the current stage depends on does not exist.
    #[error("artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// An artifact's row count disagrees with the record table.
    #[error("count mismatch for {artifact}: expected {expected} rows, found {found}")]
    CountMismatch {
        /// Which artifact disagreed.
        artifact: String,
        /// Row count of the record table.
        expected: usize,
        /// Row count of the artifact.
        found: usize,
    },

    /// Clustering produced no clusters; every point is noise.
    #[error("clustering produced no clusters ({n_points} points all labeled noise)")]
    ClusteringDegenerate {
        /// Number of points that were clustered.
        n_points: usize,
    },

    /// Too few samples to project onto the requested number of components.
    #[error("reduction skipped: {n_samples} samples < {n_components} components")]
    ReductionSkipped {
        /// Number of input vectors.
        n_samples: usize,
        /// Requested output dimensionality.
        n_components: usize,
    },

    /// Vectors are narrower than the requested number of components.
    #[error("reduction skipped: vectors have {dim} dimensions < {n_components} components")]
    ReductionTooNarrow {
        /// Vector dimensionality.
        dim: usize,
        /// Requested output dimensionality.
        n_components: usize,
    },

    /// Cross-stage invariant violated (e.g. kept/removed overlap).
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the job.
    ///
    /// Degenerate clustering and skipped reduction downgrade the result;
    /// everything else stops the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ClusteringDegenerate { .. }
                | Error::ReductionSkipped { .. }
                | Error::ReductionTooNarrow { .. }
        )
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
