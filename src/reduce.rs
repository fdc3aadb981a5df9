//! Dimensionality reduction: standardize, project onto principal axes, L2-normalize.
//!
//! The projection is fit on the full vector set once and every partition is
//! sliced from the same projected array, so a record's reduced vector does not
//! depend on which partition it ends up in.
//!
//! # Conventions
//!
//! - Features are standardized with the population standard deviation; constant
//!   features keep a scale of 1.
//! - Axes are ordered by descending explained variance.
//! - Each axis is sign-flipped so its largest-magnitude loading is positive
//!   (see [`crate::linalg::canonicalize_sign`]).
//! - Outputs are divided by `max(‖v‖₂, 1e-10)`.
//!
//! When there are fewer samples than features the eigenproblem is solved on the
//! `n x n` Gram matrix instead of the `d x d` covariance; both paths produce the
//! same axes up to rounding.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::linalg::{canonicalize_sign, symmetric_eigen};

/// Default output dimensionality.
pub const DEFAULT_COMPONENTS: usize = 6;

const NORM_FLOOR: f64 = 1e-10;

/// Contract for dimensionality reduction backends.
pub trait DimensionReducer {
    /// Project `vectors` into the reduced space.
    ///
    /// Returns [`Error::ReductionSkipped`] when there are too few samples and
    /// [`Error::ReductionTooNarrow`] when vectors have fewer dimensions than
    /// requested; the caller must then treat reduced output as absent.
    fn reduce(&self, vectors: &[Vec<f32>]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn n_components(&self) -> usize;
}

/// Principal component reducer.
#[derive(Debug, Clone)]
pub struct PcaReducer {
    n_components: usize,
}

/// A fitted projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaModel {
    mean: Vec<f64>,
    scale: Vec<f64>,
    components: Vec<Vec<f64>>,
    /// Variance captured by each component.
    pub explained_variance: Vec<f64>,
    /// Fraction of total (standardized) variance captured by each component.
    pub explained_variance_ratio: Vec<f64>,
}

impl PcaReducer {
    /// Reducer producing `n_components` axes.
    pub fn new(n_components: usize) -> Self {
        Self { n_components }
    }

    /// Fit standardization and principal axes on `vectors`.
    pub fn fit(&self, vectors: &[Vec<f32>]) -> Result<PcaModel> {
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be at least 1",
            });
        }
        let n = vectors.len();
        if n < self.n_components {
            return Err(Error::ReductionSkipped {
                n_samples: n,
                n_components: self.n_components,
            });
        }
        let d = vectors[0].len();
        for v in vectors.iter().skip(1) {
            if v.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: v.len(),
                });
            }
        }
        if d < self.n_components {
            return Err(Error::ReductionTooNarrow {
                dim: d,
                n_components: self.n_components,
            });
        }

        let (mean, scale) = standardization(vectors, d);
        let x: Vec<Vec<f64>> = vectors
            .par_iter()
            .map(|v| standardize(v, &mean, &scale))
            .collect();
        let denom = (n.max(2) - 1) as f64;

        let (values, axes) = if n < d {
            gram_axes(&x, n, d, denom)
        } else {
            covariance_axes(&x, d, denom)
        };

        let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
        let explained_variance: Vec<f64> = values[..self.n_components]
            .iter()
            .map(|v| v.max(0.0))
            .collect();
        let explained_variance_ratio = explained_variance
            .iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect();

        Ok(PcaModel {
            mean,
            scale,
            components: axes.into_iter().take(self.n_components).collect(),
            explained_variance,
            explained_variance_ratio,
        })
    }
}

impl DimensionReducer for PcaReducer {
    fn reduce(&self, vectors: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let model = self.fit(vectors)?;
        model.transform(vectors)
    }

    fn n_components(&self) -> usize {
        self.n_components
    }
}

impl Default for PcaReducer {
    fn default() -> Self {
        Self::new(DEFAULT_COMPONENTS)
    }
}

impl PcaModel {
    /// Project and L2-normalize `vectors` with the fitted axes.
    pub fn transform(&self, vectors: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let d = self.mean.len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != d) {
            return Err(Error::DimensionMismatch {
                expected: d,
                found: bad.len(),
            });
        }
        Ok(vectors
            .par_iter()
            .map(|v| {
                let x = standardize(v, &self.mean, &self.scale);
                let projected: Vec<f64> = self
                    .components
                    .iter()
                    .map(|axis| dot(&x, axis))
                    .collect();
                normalize(&projected)
            })
            .collect())
    }

    /// Output dimensionality.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }
}

fn standardization(vectors: &[Vec<f32>], d: usize) -> (Vec<f64>, Vec<f64>) {
    let n = vectors.len() as f64;
    let mut mean = vec![0.0f64; d];
    for v in vectors {
        for (m, &x) in mean.iter_mut().zip(v) {
            *m += f64::from(x);
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut var = vec![0.0f64; d];
    for v in vectors {
        for ((acc, &x), m) in var.iter_mut().zip(v).zip(&mean) {
            let c = f64::from(x) - m;
            *acc += c * c;
        }
    }
    let scale = var
        .into_iter()
        .map(|s| {
            let std = (s / n).sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        })
        .collect();
    (mean, scale)
}

fn standardize(v: &[f32], mean: &[f64], scale: &[f64]) -> Vec<f64> {
    v.iter()
        .zip(mean)
        .zip(scale)
        .map(|((&x, m), s)| (f64::from(x) - m) / s)
        .collect()
}

/// Eigen-decompose the `d x d` covariance of the rows of `x`.
fn covariance_axes(x: &[Vec<f64>], d: usize, denom: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut cov = vec![0.0f64; d * d];
    cov.par_chunks_mut(d).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate().skip(i) {
            *cell = x.iter().map(|r| r[i] * r[j]).sum::<f64>() / denom;
        }
    });
    for i in 0..d {
        for j in 0..i {
            cov[i * d + j] = cov[j * d + i];
        }
    }
    let eig = symmetric_eigen(&cov, d);
    (eig.values, eig.vectors)
}

/// Eigen-decompose via the `n x n` Gram matrix and map back to feature space.
fn gram_axes(x: &[Vec<f64>], n: usize, d: usize, denom: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut gram = vec![0.0f64; n * n];
    gram.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = dot(&x[i], &x[j]) / denom;
        }
    });
    let eig = symmetric_eigen(&gram, n);

    let axes = eig
        .vectors
        .iter()
        .map(|u| {
            let mut axis = vec![0.0f64; d];
            for (row, &weight) in x.iter().zip(u) {
                for (a, &r) in axis.iter_mut().zip(row) {
                    *a += weight * r;
                }
            }
            let norm = dot(&axis, &axis).sqrt();
            if norm > NORM_FLOOR {
                for a in &mut axis {
                    *a /= norm;
                }
            } else {
                axis.iter_mut().for_each(|a| *a = 0.0);
            }
            canonicalize_sign(&mut axis);
            axis
        })
        .collect();
    (eig.values, axes)
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &[f64]) -> Vec<f32> {
    let norm = dot(v, v).sqrt().max(NORM_FLOOR);
    v.iter().map(|&x| (x / norm) as f32).collect()
}
