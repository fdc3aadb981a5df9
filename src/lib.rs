//! Density clustering and index-aligned dataset debiasing.
//!
//! `debias` takes a table of text records, embeds each record, groups the
//! vectors with HDBSCAN, and thins out the largest clusters to produce a kept
//! and a removed dataset. Every artifact (rows, raw vectors, reduced vectors)
//! is sliced with the same index sets, so row `i` of any kept artifact always
//! describes the same original record.
//!
//! Layers, leaf first:
//! - [`store`]: index-stable vectors with `.npy` persistence and fingerprints
//! - [`cluster`]: HDBSCAN and cluster ranking (density or size)
//! - [`reduce`]: standardize + PCA + L2 normalisation
//! - [`partition`]: kept/removed selection and aligned slicing
//! - [`pipeline`]: per-job orchestration with a persisted status file
//!
//! ```rust
//! use debias::partition::Debiaser;
//!
//! // Clusters of size 10, 5 and 5.
//! let mut labels = vec![0; 10];
//! labels.extend([1; 5]);
//! labels.extend([2; 5]);
//!
//! let p = Debiaser::default().partition(20, &labels).unwrap();
//! assert_eq!(p.removed.len(), 9);
//! assert_eq!(p.kept.len(), 11);
//! ```

#![forbid(unsafe_code)]

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod embed;
pub mod error;
pub mod linalg;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod reduce;
pub mod report;
pub mod store;
pub mod table;

pub use cluster::{ClusterRanker, Clustering, Hdbscan, Metric, Score, NOISE};
pub use embed::{Embedder, HashingEmbedder};
pub use error::{Error, Result};
pub use partition::{Debiaser, Partition, SamplingScope};
pub use pipeline::{JobConfig, JobState, JobStatus, Pipeline};
pub use reduce::{DimensionReducer, PcaReducer};
pub use store::VectorStore;
pub use table::RecordTable;
