//! JSON-lines dead-letter file.
//!
//! Each record is serialized to a single line and written with one
//! `write_all` on a file opened in append mode, so concurrent writers (even
//! across processes) never interleave within a line.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{DeadLetterRecord, DeadLetterSink, StorageError};

#[derive(Debug, Clone)]
pub struct FileDeadLetterSink {
    path: PathBuf,
    sync_on_write: bool,
}

impl FileDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
        }
    }

    /// Skip `fsync` after each record
    pub fn without_sync(mut self) -> Self {
        self.sync_on_write = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(path: &Path, line: &[u8], sync: bool) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn persist(&self, record: &DeadLetterRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path.clone();
        let sync = self.sync_on_write;
        tokio::task::spawn_blocking(move || Self::append_line(&path, &line, sync))
            .await
            .map_err(|e| StorageError::Interrupted {
                message: e.to_string(),
            })?
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), reason = %record.reason, "Dead-letter record appended");
        Ok(())
    }
}

/// Read every record from a dead-letter file; a missing file reads as empty
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeadLetterRecord>, StorageError> {
    let path = path.as_ref();
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
