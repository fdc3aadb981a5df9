//! Text embedding.
//!
//! The pipeline only needs a function from text to a fixed-width vector.
//! [`HashingEmbedder`] is the built-in one: signed feature hashing of
//! lower-cased alphanumeric tokens, L2-normalised. It needs no model files
//! and gives identical output on every platform.

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Default width of [`HashingEmbedder`] output.
pub const DEFAULT_DIM: usize = 384;

/// Maps text to fixed-width vectors.
pub trait Embedder: Send + Sync {
    /// Output width. Every vector returned must have exactly this length.
    fn dim(&self) -> usize;

    /// Stable identifier; cached vectors from a different embedder are stale.
    fn id(&self) -> String;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, preserving order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.par_iter().map(|t| self.embed(t)).collect()
    }
}

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidParameter {
                name: "dim",
                message: "must be at least 1",
            });
        }
        Ok(Self { dim })
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dim: DEFAULT_DIM }
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn id(&self) -> String {
        format!("hashing-v1-d{}", self.dim)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokens(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Lower-cased runs of alphanumeric characters.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

// 64-bit FNV-1a; stable across platforms and releases, unlike DefaultHasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Metric;

    #[test]
    fn output_is_unit_norm_and_fixed_width() {
        let e = HashingEmbedder::new(64).unwrap();
        let v = e.embed("Rust systems engineer, rust!").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashingEmbedder::default().embed("  ...  ").unwrap();
        assert_eq!(v.len(), DEFAULT_DIM);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let e = HashingEmbedder::default();
        assert_eq!(
            e.embed("Data Analyst").unwrap(),
            e.embed("data, analyst.").unwrap()
        );
    }

    #[test]
    fn similar_texts_are_closer() {
        let e = HashingEmbedder::default();
        let a = e.embed("python data analyst sql dashboards").unwrap();
        let b = e.embed("data analyst python sql reporting").unwrap();
        let c = e.embed("registered nurse patient care hospital").unwrap();
        assert!(Metric::Cosine.distance(&a, &b) < Metric::Cosine.distance(&a, &c));
    }

    #[test]
    fn batch_preserves_order() {
        let e = HashingEmbedder::new(16).unwrap();
        let batch = e.embed_batch(&["one", "two", "three"]).unwrap();
        assert_eq!(batch[1], e.embed("two").unwrap());
    }

    #[test]
    fn zero_dim_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn tokens_lowercase_alphanumeric_runs() {
        let t: Vec<String> = tokens("C++ & Go-lang, SQL2019").collect();
        assert_eq!(t, vec!["c", "go", "lang", "sql2019"]);
    }
}
