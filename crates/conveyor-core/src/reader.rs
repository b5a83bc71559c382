//! Record readers
//!
//! A reader produces a finite sequence of input records from a source.
//! Readers are stateless per invocation and restartable: every call to
//! [`RecordReader::read`] yields the full sequence from the beginning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Generic source of input records for one pipeline stage
#[async_trait]
pub trait RecordReader<T>: Send + Sync {
    /// Read the full record sequence from the beginning
    async fn read(&self) -> Result<Vec<T>>;
}

/// A delimited-text record as parsed by [`DelimitedFileReader`]: one map of
/// column name to raw field value per row
pub type TextRecord = BTreeMap<String, String>;

/// In-memory reader, for tests and for chaining stages without persistence
pub struct MemoryReader<T> {
    records: Vec<T>,
}

impl<T> MemoryReader<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl<T> RecordReader<T> for MemoryReader<T>
where
    T: Clone + Send + Sync,
{
    async fn read(&self) -> Result<Vec<T>> {
        Ok(self.records.clone())
    }
}

/// Reader for delimited text files (CSV and friends)
///
/// The first row is treated as a header by default; each subsequent row
/// deserializes into `T` by column name. Deserializing into [`TextRecord`]
/// keeps every field as a raw string.
pub struct DelimitedFileReader {
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
}

impl DelimitedFileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            has_headers: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> RecordReader<T> for DelimitedFileReader
where
    T: DeserializeOwned + Send + Sync,
{
    async fn read(&self) -> Result<Vec<T>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read source file {}", self.path.display()))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .from_reader(bytes.as_slice());

        let mut records = Vec::new();
        for (row, result) in reader.deserialize().enumerate() {
            let record: T = result.with_context(|| {
                format!("Failed to parse row {} of {}", row + 1, self.path.display())
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

/// Reader that re-reads the valid items of a persisted snapshot document
///
/// This is how stages chain across a restart: the downstream stage reads
/// the upstream stage's snapshot file instead of re-running it. Only the
/// `valid_items` field is deserialized; the rest of the snapshot is ignored.
pub struct SnapshotReader {
    path: PathBuf,
}

impl SnapshotReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(serde::Deserialize)]
struct ValidItemsOnly<T> {
    valid_items: Vec<T>,
}

#[async_trait]
impl<T> RecordReader<T> for SnapshotReader
where
    T: DeserializeOwned + Send + Sync,
{
    async fn read(&self) -> Result<Vec<T>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", self.path.display()))?;

        let doc: ValidItemsOnly<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot {}", self.path.display()))?;

        Ok(doc.valid_items)
    }
}
