use crate::error::{PipelineError, Result};
use crate::models::{Document, DocumentMetadata};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Metadata key carrying the source PDF file name.
pub const SOURCE_KEY: &str = "source";

const ANNOTATION_SUFFIX: &str = "meta.json";

/// Listing + fetch view of wherever the document supplier deposits PDFs.
pub trait DocumentSource: Send + Sync {
    /// Every PDF in the collection, ordered by file name.
    fn list(&self) -> Result<Vec<Document>>;

    fn fetch(&self, document: &Document) -> Result<Vec<u8>>;
}

/// A flat directory of PDFs, optionally accompanied by `<stem>.meta.json`
/// annotation files whose fields are merged into the document metadata.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DocumentSource for LocalDirectorySource {
    fn list(&self) -> Result<Vec<Document>> {
        let files = discover_pdf_files(&self.root)?;
        let mut documents = Vec::with_capacity(files.len());

        for path in files {
            let mut document = Document::new(path);
            let file_name = document.file_name()?.to_string();

            let annotation_path = annotation_path(&document.path);
            if annotation_path.is_file() {
                match read_annotations(&annotation_path) {
                    Ok(annotations) => document.metadata.merge(&annotations),
                    Err(error) => warn!(
                        path = %annotation_path.display(),
                        error = %error,
                        "ignoring unreadable annotation file"
                    ),
                }
            }
            document.metadata.insert(SOURCE_KEY, file_name);

            documents.push(document);
        }

        Ok(documents)
    }

    fn fetch(&self, document: &Document) -> Result<Vec<u8>> {
        Ok(fs::read(&document.path)?)
    }
}

/// PDFs directly inside `folder` (no recursion), sorted by file name.
/// Anything without a `.pdf` extension is ignored.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(PipelineError::InvalidArgument(format!(
            "reports directory does not exist: {}",
            folder.display()
        )));
    }
    // surfaces permission errors that walkdir would silently swallow below
    fs::read_dir(folder)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if has_pdf_extension(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files)
}

pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn annotation_path(pdf: &Path) -> PathBuf {
    pdf.with_extension(ANNOTATION_SUFFIX)
}

fn read_annotations(path: &Path) -> Result<DocumentMetadata> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Value::Object(fields) = value else {
        return Err(PipelineError::InvalidArgument(format!(
            "annotation file is not a JSON object: {}",
            path.display()
        )));
    };

    let mut metadata = DocumentMetadata::new();
    for (key, value) in fields {
        let value = match value {
            Value::Null => continue,
            Value::String(text) => text,
            other => other.to_string(),
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_flat_sorted_and_pdf_only() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        for name in ["report_Somalia_1.pdf", "report_Ethiopia_0.PDF", "notes.txt"] {
            File::create(base.join(name)).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        }
        File::create(nested.join("deep.pdf"))?;

        let files = discover_pdf_files(base)?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["report_Ethiopia_0.PDF", "report_Somalia_1.pdf"]);
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let result = discover_pdf_files(Path::new("/definitely/not/a/reports/dir"));
        assert!(matches!(result, Err(PipelineError::InvalidArgument(_))));
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn listing_merges_annotations_and_source() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("report_Somalia_0.pdf"), b"%PDF-1.4")?;
        fs::write(
            dir.path().join("report_Somalia_0.meta.json"),
            r#"{"country": "Somalia", "year": 2024, "sequence_index": "9", "note": null, "source": "renamed.pdf"}"#,
        )?;
        fs::write(dir.path().join("report_Somalia_1.pdf"), b"%PDF-1.4")?;
        fs::write(dir.path().join("report_Somalia_1.meta.json"), b"[1, 2]")?;

        let documents = LocalDirectorySource::new(dir.path()).list()?;
        assert_eq!(documents.len(), 2);

        let annotated = &documents[0].metadata;
        assert_eq!(annotated.get(SOURCE_KEY), Some("report_Somalia_0.pdf"));
        assert_eq!(annotated.get("country"), Some("Somalia"));
        assert_eq!(annotated.get("year"), Some("2024"));
        assert_eq!(annotated.get("source_sequence_index"), Some("9"));
        assert_eq!(annotated.get("note"), None);

        let plain = &documents[1].metadata;
        assert_eq!(plain.len(), 1);
        assert_eq!(plain.get(SOURCE_KEY), Some("report_Somalia_1.pdf"));
        Ok(())
    }
}
