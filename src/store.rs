//! Index-stable vector storage.
//!
//! Row `i` of a [`VectorStore`] always belongs to original index `i` of the
//! job's record table (or, after slicing, to the `i`-th index of the slice).
//!
//! On disk a store is a NumPy `.npy` file (`<f4`, C order, shape `(N, D)`)
//! plus a JSON sidecar holding a [`Fingerprint`]. The sidecar is what makes a
//! cached artifact reusable: a file whose bytes, shape or source no longer
//! match its fingerprint is treated as stale.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Ordered collection of equal-width vectors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorStore {
    dim: usize,
    rows: Vec<Vec<f32>>,
}

/// Content and shape summary stored next to a vector artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Number of vectors.
    pub count: usize,
    /// Vector width.
    pub dim: usize,
    /// SHA-256 over the little-endian `f32` payload.
    pub digest: String,
    /// Digest of whatever the vectors were derived from, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Outcome of checking a cached artifact.
#[derive(Debug)]
pub enum CacheStatus {
    /// Present, intact and matching the expected count and source.
    Valid(VectorStore),
    /// No artifact on disk.
    Missing,
    /// Present but the row count differs from the record count.
    CountMismatch { expected: usize, found: usize },
    /// Present but unusable for another reason.
    Stale(String),
}

impl VectorStore {
    /// Build a store, checking every row has the same width.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
        Ok(Self { dim, rows })
    }

    /// An empty store of width `dim`.
    pub fn empty(dim: usize) -> Self {
        Self {
            dim,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn get(&self, i: usize) -> Option<&[f32]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    /// Rows at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let mut rows = Vec::with_capacity(indices.len());
        for &i in indices {
            let row = self.rows.get(i).ok_or_else(|| {
                Error::Consistency(format!(
                    "index {i} out of range for {} vectors",
                    self.rows.len()
                ))
            })?;
            rows.push(row.clone());
        }
        Ok(Self {
            dim: self.dim,
            rows,
        })
    }

    /// Fingerprint of the current contents.
    pub fn fingerprint(&self, source: Option<String>) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update((self.rows.len() as u64).to_le_bytes());
        hasher.update((self.dim as u64).to_le_bytes());
        for row in &self.rows {
            for x in row {
                hasher.update(x.to_le_bytes());
            }
        }
        Fingerprint {
            count: self.rows.len(),
            dim: self.dim,
            digest: format!("{:x}", hasher.finalize()),
            source,
        }
    }

    /// Write `path` as `.npy`.
    pub fn write_npy(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(fs::File::create(path)?);
        out.write_all(&npy_header(self.rows.len(), self.dim))?;
        for row in &self.rows {
            for x in row {
                out.write_all(&x.to_le_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Read a two-dimensional `<f4` or `<f8` `.npy` file.
    ///
    /// `<f8` values are narrowed to `f32`, so precision beyond single
    /// precision is lost; the narrowing is logged at debug level.
    pub fn read_npy(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ArtifactMissing(path.to_path_buf()));
        }
        let mut bytes = Vec::new();
        fs::File::open(path)?.read_to_end(&mut bytes)?;
        decode_npy(&bytes).map_err(|msg| Error::InputInvalid(format!("{}: {msg}", path.display())))
    }

    /// Write the array and its fingerprint sidecar.
    pub fn save(&self, path: &Path, source: Option<String>) -> Result<Fingerprint> {
        self.write_npy(path)?;
        let fp = self.fingerprint(source);
        fs::write(sidecar_path(path), serde_json::to_string_pretty(&fp)?)?;
        tracing::debug!(path = %path.display(), count = fp.count, dim = fp.dim, "saved vectors");
        Ok(fp)
    }

    /// Check whether the artifact at `path` can be reused for `expected`
    /// records derived from `source`.
    pub fn load_cached(path: &Path, expected: usize, source: Option<&str>) -> Result<CacheStatus> {
        if !path.exists() {
            return Ok(CacheStatus::Missing);
        }
        let store = match Self::read_npy(path) {
            Ok(store) => store,
            Err(Error::InputInvalid(msg)) => return Ok(CacheStatus::Stale(msg)),
            Err(e) => return Err(e),
        };
        if store.len() != expected {
            return Ok(CacheStatus::CountMismatch {
                expected,
                found: store.len(),
            });
        }

        let meta = sidecar_path(path);
        let recorded: Fingerprint = match fs::read_to_string(&meta) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(fp) => fp,
                Err(e) => return Ok(CacheStatus::Stale(format!("unreadable fingerprint: {e}"))),
            },
            Err(_) => return Ok(CacheStatus::Stale("no fingerprint".to_string())),
        };
        let actual = store.fingerprint(recorded.source.clone());
        if actual != recorded {
            return Ok(CacheStatus::Stale("contents changed since fingerprint".to_string()));
        }
        if let (Some(want), Some(have)) = (source, recorded.source.as_deref()) {
            if want != have {
                return Ok(CacheStatus::Stale("source records changed".to_string()));
            }
        }
        Ok(CacheStatus::Valid(store))
    }
}

/// Sidecar location for an artifact: `vectors.npy` -> `vectors.npy.meta.json`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".meta.json");
    path.with_file_name(name)
}

/// Remove an artifact and its sidecar, ignoring files that are already gone.
pub fn discard(path: &Path) -> Result<()> {
    for p in [path.to_path_buf(), sidecar_path(path)] {
        match fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn npy_header(rows: usize, cols: usize) -> Vec<u8> {
    let mut dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic(6) + version(2) + len(2) + dict + '\n' must be a multiple of NPY_ALIGN.
    let unpadded = NPY_MAGIC.len() + 4 + dict.len() + 1;
    let pad = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    dict.extend(std::iter::repeat(' ').take(pad));
    dict.push('\n');

    let mut header = Vec::with_capacity(NPY_MAGIC.len() + 4 + dict.len());
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

fn decode_npy(bytes: &[u8]) -> std::result::Result<VectorStore, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("not an .npy file".to_string());
    }
    let (header_len, offset) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(format!("unsupported .npy version {v}")),
    };
    let body_start = offset + header_len;
    let header = bytes
        .get(offset..body_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or("truncated header")?;

    let width = if header.contains("'<f4'") {
        4
    } else if header.contains("'<f8'") {
        8
    } else {
        return Err("only little-endian float32/float64 arrays are supported".to_string());
    };
    if header.contains("'fortran_order': True") {
        return Err("fortran-ordered arrays are not supported".to_string());
    }
    let (rows, cols) = parse_shape(header)?;

    let body = &bytes[body_start..];
    let needed = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(width))
        .ok_or("shape overflows")?;
    if body.len() != needed {
        return Err(format!(
            "payload is {} bytes, shape ({rows}, {cols}) needs {needed}",
            body.len()
        ));
    }

    let values: Vec<f32> = if width == 4 {
        body.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else {
        tracing::debug!(rows, cols, "narrowing float64 .npy payload to float32");
        body.chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b) as f32
            })
            .collect()
    };
    let rows_vec = if cols == 0 {
        vec![Vec::new(); rows]
    } else {
        values.chunks_exact(cols).map(<[f32]>::to_vec).collect()
    };
    Ok(VectorStore {
        dim: cols,
        rows: rows_vec,
    })
}

fn parse_shape(header: &str) -> std::result::Result<(usize, usize), String> {
    let start = header.find("'shape'").ok_or("missing shape")?;
    let rest = &header[start..];
    let open = rest.find('(').ok_or("malformed shape")?;
    let close = rest.find(')').ok_or("malformed shape")?;
    let dims: Vec<usize> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad shape entry {s:?}: {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match dims.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        _ => Err(format!("expected a 2-D array, got shape {dims:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VectorStore {
        VectorStore::from_rows(vec![vec![1.0, 2.0, 3.0], vec![-0.5, 0.25, 1e-7]]).unwrap()
    }

    #[test]
    fn npy_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.npy");
        let s = store();
        s.write_npy(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let header_total = 10 + usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        assert_eq!(header_total % NPY_ALIGN, 0);
        assert_eq!(bytes.len(), header_total + 2 * 3 * 4);

        assert_eq!(VectorStore::read_npy(&path).unwrap(), s);
    }

    #[test]
    fn empty_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npy");
        VectorStore::empty(4).write_npy(&path).unwrap();
        let back = VectorStore::read_npy(&path).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.dim(), 4);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = VectorStore::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn select_preserves_order_and_checks_bounds() {
        let s = store();
        let picked = s.select(&[1, 0]).unwrap();
        assert_eq!(picked.get(0), s.get(1));
        assert!(matches!(s.select(&[2]), Err(Error::Consistency(_))));
    }

    #[test]
    fn cache_status_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.npy");
        assert!(matches!(
            VectorStore::load_cached(&path, 2, None).unwrap(),
            CacheStatus::Missing
        ));

        store().save(&path, Some("abc".into())).unwrap();
        assert!(matches!(
            VectorStore::load_cached(&path, 2, Some("abc")).unwrap(),
            CacheStatus::Valid(_)
        ));
        assert!(matches!(
            VectorStore::load_cached(&path, 3, Some("abc")).unwrap(),
            CacheStatus::CountMismatch { expected: 3, found: 2 }
        ));
        assert!(matches!(
            VectorStore::load_cached(&path, 2, Some("xyz")).unwrap(),
            CacheStatus::Stale(_)
        ));

        // Overwrite the payload without updating the sidecar.
        VectorStore::from_rows(vec![vec![9.0, 9.0, 9.0], vec![0.0, 0.0, 0.0]])
            .unwrap()
            .write_npy(&path)
            .unwrap();
        assert!(matches!(
            VectorStore::load_cached(&path, 2, Some("abc")).unwrap(),
            CacheStatus::Stale(_)
        ));

        discard(&path).unwrap();
        assert!(!path.exists());
        assert!(!sidecar_path(&path).exists());
    }

    #[test]
    fn reads_float64_arrays() {
        let mut dict = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 2), }".to_string();
        while (10 + dict.len() + 1) % 16 != 0 {
            dict.push(' ');
        }
        dict.push('\n');
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.extend_from_slice(&0.1f64.to_le_bytes());

        let s = decode_npy(&bytes).unwrap();
        // Narrowed to the nearest f32.
        assert_eq!(s.rows(), &[vec![1.5f32, 0.1f32]]);
        assert_ne!(f64::from(s.rows()[0][1]), 0.1f64);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = npy_header(2, 2);
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        assert!(decode_npy(&bytes).is_err());
    }
}
