//! Rotating JSON-lines output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What a finished [`ChunkWriter`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Writes one JSON object per line into `<dir>/<prefix><N>.jsonl`, starting a
/// new file after every `chunk_size` records.
///
/// Files are created on the first record they receive, so an empty run
/// leaves no file behind. Existing files with the same name are truncated.
/// Dropping the writer flushes the open file; call [`ChunkWriter::finish`] to
/// surface flush errors.
pub struct ChunkWriter {
    dir: PathBuf,
    prefix: String,
    chunk_size: usize,
    current: Option<BufWriter<File>>,
    in_chunk: usize,
    chunk_index: usize,
    records: usize,
    files: Vec<PathBuf>,
}

impl ChunkWriter {
    /// Create `dir` if needed. `chunk_size` must be positive.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, chunk_size: usize) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk_size must be at least 1");
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output dir: {}", dir.display()))?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            chunk_size,
            current: None,
            in_chunk: 0,
            chunk_index: 0,
            records: 0,
            files: Vec::new(),
        })
    }

    /// Path of chunk `index`.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        chunk_path(&self.dir, &self.prefix, index)
    }

    /// Records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append one record, rotating once the current chunk is full.
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record).context("Cannot serialize record")?;

        if self.current.is_none() {
            let path = self.chunk_path(self.chunk_index);
            let file = File::create(&path)
                .with_context(|| format!("Cannot create {}", path.display()))?;
            info!(path = %path.display(), "Opened output chunk");
            self.current = Some(BufWriter::new(file));
            self.files.push(path);
        }
        if let Some(out) = self.current.as_mut() {
            writeln!(out, "{line}").context("Cannot write record")?;
        }

        self.in_chunk += 1;
        self.records += 1;
        if self.in_chunk == self.chunk_size {
            self.close_current()?;
            self.chunk_index += 1;
            self.in_chunk = 0;
        }
        Ok(())
    }

    /// Flush and close the open chunk, returning what was written.
    pub fn finish(mut self) -> Result<ChunkSummary> {
        self.close_current()?;
        Ok(ChunkSummary { records: self.records, files: std::mem::take(&mut self.files) })
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut out) = self.current.take() {
            out.flush().context("Cannot flush output chunk")?;
            debug!(chunk = self.chunk_index, records = self.in_chunk, "Closed output chunk");
        }
        Ok(())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close_current() {
            warn!(error = %e, "Failed to flush output chunk on drop");
        }
    }
}

pub fn chunk_path(dir: &Path, prefix: &str, index: usize) -> PathBuf {
    dir.join(format!("{prefix}{index}.jsonl"))
}
