use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ChunkRecord};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const RECORD_EXTENSION: &str = "json";

/// Persists chunks as individually addressable records.
pub trait ChunkWriter: Send + Sync {
    /// Writes (or overwrites) the record for `chunk` and returns its identifier.
    fn write(&self, document_stem: &str, chunk: &Chunk) -> Result<String>;

    /// Removes records of `document_stem` numbered `first_stale` and above,
    /// left behind by a run that produced more chunks. Returns how many went.
    fn prune(&self, document_stem: &str, first_stale: usize) -> Result<usize>;
}

/// `<stem>_chunk_<sequence_index>`: unique within a document and stable across runs.
pub fn record_identifier(document_stem: &str, sequence_index: usize) -> String {
    format!("{document_stem}_chunk_{sequence_index}")
}

/// One pretty-printed JSON object per chunk in a flat directory.
#[derive(Debug, Clone)]
pub struct JsonChunkWriter {
    dir: PathBuf,
}

impl JsonChunkWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, record: &str) -> PathBuf {
        self.dir.join(format!("{record}.{RECORD_EXTENSION}"))
    }
}

impl ChunkWriter for JsonChunkWriter {
    fn write(&self, document_stem: &str, chunk: &Chunk) -> Result<String> {
        let record = record_identifier(document_stem, chunk.sequence_index);
        let body = render_record(&ChunkRecord::from(chunk))?;

        let path = self.record_path(&record);
        let staging = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        fs::write(&staging, body)
            .and_then(|()| fs::rename(&staging, &path))
            .map_err(|source| {
                let _ = fs::remove_file(&staging);
                PipelineError::WriteFailure {
                    record: record.clone(),
                    source,
                }
            })?;

        Ok(record)
    }

    fn prune(&self, document_stem: &str, first_stale: usize) -> Result<usize> {
        let mut removed = 0;
        for sequence_index in first_stale.. {
            let path = self.record_path(&record_identifier(document_stem, sequence_index));
            if !path.is_file() {
                break;
            }
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Four-space indented JSON with non-ASCII text kept verbatim.
fn render_record(record: &ChunkRecord) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    record.serialize(&mut serializer)?;
    Ok(body)
}
