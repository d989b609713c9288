//! On-disk text stage: `<stem>.txt` holds the page texts separated by form
//! feeds, `<stem>.metadata.json` holds the merged metadata and the digests of
//! the PDF and annotations the text came from.

use crate::error::Result;
use crate::ingest::digest_bytes;
use crate::models::{DocumentMetadata, ExtractedText};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const PAGE_SEPARATOR: char = '\u{000C}';

/// What a text artifact was derived from. A saved artifact is only reused
/// when both digests still match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDigest {
    /// sha256 of the PDF bytes.
    pub pdf: String,
    /// sha256 of the document metadata known before extraction (file name
    /// and annotations).
    pub annotations: String,
}

impl SourceDigest {
    pub fn of(bytes: &[u8], annotations: &DocumentMetadata) -> Result<Self> {
        Ok(Self {
            pdf: digest_bytes(bytes),
            annotations: digest_bytes(&serde_json::to_vec(annotations)?),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    source: SourceDigest,
    page_count: usize,
    metadata: DocumentMetadata,
}

#[derive(Debug, Clone)]
pub struct TextArtifactStore {
    dir: PathBuf,
}

impl TextArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn text_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.txt"))
    }

    pub fn metadata_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.metadata.json"))
    }

    pub fn save(&self, stem: &str, extracted: &ExtractedText, source: &SourceDigest) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let text_path = self.text_path(stem);
        let separator = PAGE_SEPARATOR.to_string();
        fs::write(&text_path, extracted.pages.join(&separator))?;

        let header = ArtifactHeader {
            source: source.clone(),
            page_count: extracted.pages.len(),
            metadata: extracted.source_metadata.clone(),
        };
        fs::write(self.metadata_path(stem), serde_json::to_vec_pretty(&header)?)?;

        Ok(text_path)
    }

    /// Previously saved text for `stem`, or `None` when the artifacts are
    /// missing, unreadable, or were produced from a different PDF or
    /// different annotations.
    pub fn load(&self, stem: &str, source: &SourceDigest) -> Result<Option<ExtractedText>> {
        let text_path = self.text_path(stem);
        let metadata_path = self.metadata_path(stem);
        if !text_path.is_file() || !metadata_path.is_file() {
            return Ok(None);
        }

        let header: ArtifactHeader = match serde_json::from_slice(&fs::read(&metadata_path)?) {
            Ok(header) => header,
            Err(error) => {
                debug!(path = %metadata_path.display(), error = %error, "stale text artifact header");
                return Ok(None);
            }
        };
        if header.source != *source {
            return Ok(None);
        }

        let text = fs::read_to_string(&text_path)?;
        let pages: Vec<String> = if header.page_count == 0 {
            Vec::new()
        } else {
            text.split(PAGE_SEPARATOR).map(str::to_string).collect()
        };
        if pages.len() != header.page_count {
            return Ok(None);
        }

        Ok(Some(ExtractedText {
            pages,
            source_metadata: header.metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> ExtractedText {
        let mut metadata = DocumentMetadata::new();
        metadata.insert("Title", "Somalia Displacement Dashboard");
        ExtractedText {
            pages: vec!["page one\n".to_string(), String::new(), "page three\n".to_string()],
            source_metadata: metadata,
        }
    }

    fn digest(pdf: &[u8], country: &str) -> Result<SourceDigest> {
        let annotations: DocumentMetadata = [("country", country)].into_iter().collect();
        SourceDigest::of(pdf, &annotations)
    }

    #[test]
    fn saved_text_is_named_after_the_document_stem() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = TextArtifactStore::new(dir.path().join("text_files"));

        let path = store.save("report_Somalia_0", &sample(), &digest(b"pdf", "Somalia")?)?;
        assert_eq!(path, dir.path().join("text_files").join("report_Somalia_0.txt"));
        assert_eq!(fs::read_to_string(&path)?, "page one\n\u{c}\u{c}page three\n");
        Ok(())
    }

    #[test]
    fn load_restores_pages_and_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = TextArtifactStore::new(dir.path());
        let source = digest(b"pdf", "Somalia")?;
        store.save("report", &sample(), &source)?;

        assert_eq!(store.load("report", &source)?, Some(sample()));
        Ok(())
    }

    #[test]
    fn load_ignores_artifacts_from_other_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = TextArtifactStore::new(dir.path());
        let source = digest(b"pdf", "Somalia")?;
        store.save("report", &sample(), &source)?;

        assert_eq!(store.load("report", &digest(b"other pdf", "Somalia")?)?, None);
        assert_eq!(store.load("missing", &source)?, None);
        Ok(())
    }

    #[test]
    fn load_ignores_artifacts_from_other_annotations() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = TextArtifactStore::new(dir.path());
        store.save("report", &sample(), &digest(b"pdf", "Somalia")?)?;

        assert_eq!(store.load("report", &digest(b"pdf", "Ethiopia")?)?, None);
        Ok(())
    }

    #[test]
    fn empty_documents_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = TextArtifactStore::new(dir.path());
        let source = digest(b"", "Somalia")?;
        store.save("blank", &ExtractedText::default(), &source)?;

        assert_eq!(store.load("blank", &source)?, Some(ExtractedText::default()));
        Ok(())
    }
}
