use crate::error::Result;

/// Common interface for hard clustering algorithms (one label per point).
pub trait Clustering {
    /// Fit the model and return one label per input point.
    ///
    /// Labels are `NOISE` (-1) or a cluster id in `0..k`.
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<i32>>;
}
