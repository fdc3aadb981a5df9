//! Row-oriented record table.
//!
//! Rows keep the position they had in the source file as their original
//! index. Slicing never renumbers: a sub-table carries the original indices
//! of the rows it was cut from, and they are written out as an explicit
//! `original_index` column.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Column holding the original index in written tables.
pub const ORIGINAL_INDEX: &str = "original_index";
/// Column holding the cluster label in `all_clusters.csv`.
pub const CLUSTER_COLUMN: &str = "cluster";
/// Column produced by [`RecordTable::clean_column`].
pub const CLEANED_TEXT: &str = "cleaned_text";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    original_index: Vec<usize>,
}

impl RecordTable {
    /// Build a table from headers and rows; rows are indexed by position.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != headers.len()) {
            return Err(Error::InputInvalid(format!(
                "row {i} has {} fields, expected {}",
                row.len(),
                headers.len()
            )));
        }
        let original_index = (0..rows.len()).collect();
        Ok(Self {
            headers,
            rows,
            original_index,
        })
    }

    /// Read a user-supplied CSV file with a header row.
    ///
    /// Rows are numbered by position and every column is kept as data, even
    /// one that happens to be called `original_index`.
    pub fn read_input(path: &Path) -> Result<Self> {
        Self::read_with(path, false)
    }

    /// Read a table this crate wrote, restoring the leading `original_index`
    /// column as row identity.
    pub fn read_csv(path: &Path) -> Result<Self> {
        Self::read_with(path, true)
    }

    fn read_with(path: &Path, restore_index: bool) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ArtifactMissing(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        // Written tables lead with the index, so the first match is ours.
        let index_col = if restore_index {
            headers.iter().position(|h| h == ORIGINAL_INDEX)
        } else {
            None
        };

        let mut rows = Vec::new();
        let mut original_index = Vec::new();
        for (pos, record) in reader.records().enumerate() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            match index_col {
                Some(c) => {
                    let raw = row.remove(c);
                    let idx = raw.trim().parse::<usize>().map_err(|_| {
                        Error::InputInvalid(format!("row {pos}: bad {ORIGINAL_INDEX} {raw:?}"))
                    })?;
                    original_index.push(idx);
                }
                None => original_index.push(pos),
            }
            rows.push(row);
        }
        if let Some(c) = index_col {
            headers.remove(c);
        }
        tracing::debug!(path = %path.display(), rows = rows.len(), columns = headers.len(), "read table");
        Ok(Self {
            headers,
            rows,
            original_index,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Original index of each row, in row order.
    pub fn original_indices(&self) -> &[usize] {
        &self.original_index
    }

    /// Position of `name` among the headers.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Like [`column`](Self::column) but fails with [`Error::InputInvalid`].
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| {
            Error::InputInvalid(format!(
                "missing required column {name:?} (have: {})",
                self.headers.join(", ")
            ))
        })
    }

    /// Values of column `col`, in row order.
    pub fn values(&self, col: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[col].as_str())
    }

    /// Append a column, or replace it if one with this name exists.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(Error::CountMismatch {
                artifact: format!("column {name}"),
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        match self.column(name) {
            Some(c) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[c] = v;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    /// Write `clean_text` of column `source` into [`CLEANED_TEXT`].
    pub fn clean_column(&mut self, source: &str) -> Result<usize> {
        let col = self.require_column(source)?;
        let cleaned: Vec<String> = self.values(col).map(clean_text).collect();
        self.set_column(CLEANED_TEXT, cleaned)?;
        self.require_column(CLEANED_TEXT)
    }

    /// Rows at the given positions, keeping their original indices.
    pub fn select(&self, positions: &[usize]) -> Result<Self> {
        let mut rows = Vec::with_capacity(positions.len());
        let mut original_index = Vec::with_capacity(positions.len());
        for &p in positions {
            let row = self.rows.get(p).ok_or_else(|| {
                Error::Consistency(format!("row {p} out of range for {} records", self.rows.len()))
            })?;
            rows.push(row.clone());
            original_index.push(self.original_index[p]);
        }
        Ok(Self {
            headers: self.headers.clone(),
            rows,
            original_index,
        })
    }

    /// SHA-256 over column `col`, used to tie cached vectors to their text.
    pub fn digest(&self, col: usize) -> String {
        let mut hasher = Sha256::new();
        for v in self.values(col) {
            hasher.update((v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Write with a leading `original_index` column.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        self.write_inner(path, None)
    }

    /// Write with `original_index` and a trailing `cluster` column.
    pub fn write_with_labels(&self, path: &Path, labels: &[i32]) -> Result<()> {
        if labels.len() != self.rows.len() {
            return Err(Error::CountMismatch {
                artifact: "labels".to_string(),
                expected: self.rows.len(),
                found: labels.len(),
            });
        }
        self.write_inner(path, Some(labels))
    }

    fn write_inner(&self, path: &Path, labels: Option<&[i32]>) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let mut header: Vec<&str> = Vec::with_capacity(self.headers.len() + 2);
        header.push(ORIGINAL_INDEX);
        header.extend(self.headers.iter().map(String::as_str));
        if labels.is_some() {
            header.push(CLUSTER_COLUMN);
        }
        writer.write_record(&header)?;

        for (i, row) in self.rows.iter().enumerate() {
            let mut record: Vec<String> = Vec::with_capacity(row.len() + 2);
            record.push(self.original_index[i].to_string());
            record.extend(row.iter().cloned());
            if let Some(labels) = labels {
                record.push(labels[i].to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Collapse runs of whitespace to a single space and trim the ends.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RecordTable {
        RecordTable::new(
            vec!["id".into(), "Resume_str".into()],
            vec![
                vec!["a".into(), "  Senior\tengineer \n rust ".into()],
                vec!["b".into(), "".into()],
                vec!["c".into(), "data   analyst".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a \t b\n\nc  "), "a b c");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn clean_column_adds_cleaned_text() {
        let mut t = table();
        let col = t.clean_column("Resume_str").unwrap();
        let cleaned: Vec<&str> = t.values(col).collect();
        assert_eq!(cleaned, vec!["Senior engineer rust", "", "data analyst"]);
        // A second pass replaces rather than duplicates.
        t.clean_column("Resume_str").unwrap();
        assert_eq!(t.headers().len(), 3);
    }

    #[test]
    fn missing_column_is_input_invalid() {
        let t = table();
        assert!(matches!(t.require_column("text"), Err(Error::InputInvalid(_))));
    }

    #[test]
    fn select_keeps_original_indices_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.csv");
        let sub = table().select(&[2, 0]).unwrap();
        assert_eq!(sub.original_indices(), &[2, 0]);
        sub.write_csv(&path).unwrap();

        let back = RecordTable::read_csv(&path).unwrap();
        assert_eq!(back.original_indices(), &[2, 0]);
        assert_eq!(back.headers(), sub.headers());
        assert_eq!(back, sub);
    }

    #[test]
    fn labels_column_is_written_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.csv");
        table().write_with_labels(&path, &[0, -1, 0]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("original_index,id,Resume_str,cluster\n"));
        assert!(contents.contains("\n1,b,,-1\n"));

        assert!(matches!(
            table().write_with_labels(&path, &[0]),
            Err(Error::CountMismatch { .. })
        ));
    }

    #[test]
    fn digest_tracks_text() {
        let mut t = table();
        let before = t.digest(1);
        t.set_column("Resume_str", vec!["x".into(), "y".into(), "z".into()])
            .unwrap();
        assert_ne!(before, t.digest(1));
    }

    #[test]
    fn input_keeps_user_original_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        std::fs::write(&input, "original_index,text\nabc,x\n100,y\n100,z\n").unwrap();

        let t = RecordTable::read_input(&input).unwrap();
        assert_eq!(t.original_indices(), &[0, 1, 2]);
        assert_eq!(t.headers(), &["original_index".to_string(), "text".to_string()]);
        assert_eq!(t.values(0).collect::<Vec<_>>(), vec!["abc", "100", "100"]);

        let out = dir.path().join("out.csv");
        t.select(&[2, 1]).unwrap().write_csv(&out).unwrap();
        let back = RecordTable::read_csv(&out).unwrap();
        assert_eq!(back.original_indices(), &[2, 1]);
        assert_eq!(back.values(0).collect::<Vec<_>>(), vec!["100", "100"]);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = RecordTable::new(vec!["a".into()], vec![vec![]]).unwrap_err();
        assert!(matches!(err, Error::InputInvalid(_)));
    }
}
