use crate::error::{PipelineError, Result};
use crate::normalize::NormalizerKind;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Record key holding the chunk text.
pub const PAGE_CONTENT_KEY: &str = "page_content";
/// Record key holding the chunk position within its document.
pub const SEQUENCE_INDEX_KEY: &str = "sequence_index";

const RESERVED_KEYS: [&str; 2] = [PAGE_CONTENT_KEY, SEQUENCE_INDEX_KEY];
const RENAMED_KEY_PREFIX: &str = "source_";

/// Flat, ordered string metadata attached to a document and to every chunk
/// derived from it.
///
/// Keys that collide with the record's reserved keys are stored under a
/// `source_` prefix so a PDF titled field named `sequence_index` can never
/// overwrite the injected position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentMetadata(BTreeMap<String, String>);

impl DocumentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let key = if RESERVED_KEYS.contains(&key.as_str()) {
            format!("{RENAMED_KEY_PREFIX}{key}")
        } else {
            key
        };
        self.0.insert(key, value.into());
    }

    /// Copies every entry of `other` over `self`; entries of `other` win.
    pub fn merge(&mut self, other: &DocumentMetadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for DocumentMetadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// One source PDF as listed by a [`crate::DocumentSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: DocumentMetadata::new(),
        }
    }

    pub fn file_name(&self) -> Result<&str> {
        file_component(&self.path, Path::file_name)
    }

    /// Base name without extension; every artifact of this document is named from it.
    pub fn stem(&self) -> Result<&str> {
        file_component(&self.path, Path::file_stem)
    }
}

fn file_component<'a>(
    path: &'a Path,
    component: impl Fn(&'a Path) -> Option<&'a std::ffi::OsStr>,
) -> Result<&'a str> {
    component(path)
        .and_then(|name| name.to_str())
        .ok_or_else(|| PipelineError::MissingFileName(path.display().to_string()))
}

/// Per-page text of one document, in physical page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub source_metadata: DocumentMetadata,
}

impl ExtractedText {
    /// Pages concatenated in order. Empty pages contribute nothing; a newline is
    /// inserted between pages only when the previous one does not already end
    /// with one.
    pub fn full_text(&self) -> String {
        let mut text = String::with_capacity(self.pages.iter().map(String::len).sum());
        for page in self.pages.iter().filter(|page| !page.is_empty()) {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(page);
        }
        text
    }
}

/// A bounded span of normalized document text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub sequence_index: usize,
    pub metadata: DocumentMetadata,
}

/// Persisted shape of a chunk: `page_content`, metadata at the top level, and
/// the stringified `sequence_index`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub page_content: String,
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    #[serde_as(as = "DisplayFromStr")]
    pub sequence_index: usize,
}

impl From<&Chunk> for ChunkRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            page_content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
            sequence_index: chunk.sequence_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub reports_dir: PathBuf,
    pub chunks_dir: PathBuf,
    /// Where `<stem>.txt` artifacts go; `None` disables the text stage on disk.
    pub text_dir: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub keep_alpha_chunks: bool,
    pub min_alpha_ratio: f64,
    pub normalizer: NormalizerKind,
    pub workers: usize,
    pub document_timeout: Option<Duration>,
    pub resume: bool,
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("dtm_reports"),
            chunks_dir: PathBuf::from("dtm_chunks"),
            text_dir: Some(PathBuf::from("text_files")),
            chunk_size: 512,
            chunk_overlap: 0,
            keep_alpha_chunks: true,
            min_alpha_ratio: 0.7,
            normalizer: NormalizerKind::Identity,
            workers: 1,
            document_timeout: None,
            resume: false,
            verbose: false,
        }
    }
}

impl PipelineConfig {
    /// Rejects settings that would make every document fail; called before
    /// any document is touched.
    pub fn validate(&self) -> Result<()> {
        crate::chunking::ChunkingConfig::from(self).validate()?;
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.document_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(PipelineError::InvalidConfig(
                "document timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_metadata_keys_are_renamed() {
        let mut metadata = DocumentMetadata::new();
        metadata.insert("sequence_index", "7");
        metadata.insert("page_content", "spoof");
        metadata.insert("Title", "Somalia Flow Monitoring");

        assert_eq!(metadata.get("sequence_index"), None);
        assert_eq!(metadata.get("source_sequence_index"), Some("7"));
        assert_eq!(metadata.get("source_page_content"), Some("spoof"));
        assert_eq!(metadata.get("Title"), Some("Somalia Flow Monitoring"));
    }

    #[test]
    fn full_text_skips_empty_pages_and_separates_pages() {
        let extracted = ExtractedText {
            pages: vec!["first page".to_string(), String::new(), "third page\n".to_string()],
            source_metadata: DocumentMetadata::new(),
        };
        assert_eq!(extracted.full_text(), "first page\nthird page\n");
    }

    #[test]
    fn record_serializes_flat_with_string_sequence_index() -> Result<(), Box<dyn std::error::Error>> {
        let chunk = Chunk {
            content: "Displacement rose".to_string(),
            sequence_index: 3,
            metadata: [("Title", "Report"), ("country", "Ethiopia")].into_iter().collect(),
        };

        let value = serde_json::to_value(ChunkRecord::from(&chunk))?;
        assert_eq!(value["page_content"], "Displacement rose");
        assert_eq!(value["Title"], "Report");
        assert_eq!(value["country"], "Ethiopia");
        assert_eq!(value["sequence_index"], "3");

        let back: ChunkRecord = serde_json::from_value(value)?;
        assert_eq!(back, ChunkRecord::from(&chunk));
        Ok(())
    }

    #[test]
    fn default_config_is_valid_and_bad_overlap_is_rejected() {
        assert!(PipelineConfig::default().validate().is_ok());

        let config = PipelineConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
