use crate::error::{PipelineError, Result};
use crate::ingest::has_pdf_extension;
use crate::models::{Document, DocumentMetadata, ExtractedText};
use lopdf::{Dictionary, Object};
use tracing::{debug, warn};

/// Metadata key holding the number of physical pages.
pub const PAGE_COUNT_KEY: &str = "page_count";

const PDF_SIGNATURE: &[u8] = b"%PDF-";
// readers accept junk before the header as long as it appears early
const SIGNATURE_SEARCH_WINDOW: usize = 1024;

pub trait PdfExtractor: Send + Sync {
    /// Per-page text plus merged metadata for `document`, whose raw bytes
    /// were already fetched from the source.
    fn extract(&self, document: &Document, bytes: &[u8]) -> Result<ExtractedText>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, document: &Document, bytes: &[u8]) -> Result<ExtractedText> {
        let path = &document.path;
        check_pdf_signature(document, bytes)?;

        let mut pdf = lopdf::Document::load_mem(bytes).map_err(|error| {
            let reason = error.to_string();
            if reason.to_ascii_lowercase().contains("crypt") {
                PipelineError::extraction(path, reason)
            } else {
                PipelineError::invalid_format(path, reason)
            }
        })?;

        // permission-only encryption uses an empty user password
        if pdf.trailer.get(b"Encrypt").is_ok() {
            pdf.decrypt("").map_err(|error| {
                PipelineError::extraction(
                    path,
                    format!("encrypted document could not be opened with an empty password: {error}"),
                )
            })?;
            debug!(path = %path.display(), "decrypted with empty user password");
        }

        let mut metadata = native_metadata(&pdf);
        let pages = extract_pages(&pdf, document)?;
        metadata.merge(&document.metadata);
        metadata.insert(PAGE_COUNT_KEY, pages.len().to_string());

        Ok(ExtractedText {
            pages,
            source_metadata: metadata,
        })
    }
}

fn check_pdf_signature(document: &Document, bytes: &[u8]) -> Result<()> {
    if !has_pdf_extension(&document.path) {
        return Err(PipelineError::invalid_format(
            &document.path,
            "file extension is not .pdf",
        ));
    }

    let window = &bytes[..bytes.len().min(SIGNATURE_SEARCH_WINDOW)];
    if !window
        .windows(PDF_SIGNATURE.len())
        .any(|candidate| candidate == PDF_SIGNATURE)
    {
        return Err(PipelineError::invalid_format(
            &document.path,
            "missing %PDF- header",
        ));
    }
    Ok(())
}

/// One string per page in page order. Pages without extractable text become
/// `""`; the document only fails when no page could be read at all.
fn extract_pages(pdf: &lopdf::Document, document: &Document) -> Result<Vec<String>> {
    let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
    let mut pages = Vec::with_capacity(page_numbers.len());
    let mut failures = 0usize;

    for page_no in &page_numbers {
        match pdf.extract_text(&[*page_no]) {
            Ok(text) if text.trim().is_empty() => {
                debug!(path = %document.path.display(), page = page_no, "page has no extractable text");
                pages.push(String::new());
            }
            Ok(text) => pages.push(text),
            Err(error) => {
                warn!(
                    path = %document.path.display(),
                    page = page_no,
                    error = %error,
                    "page text extraction failed; keeping empty page"
                );
                failures += 1;
                pages.push(String::new());
            }
        }
    }

    if !page_numbers.is_empty() && failures == page_numbers.len() {
        return Err(PipelineError::extraction(
            &document.path,
            format!("text extraction failed on all {} pages", page_numbers.len()),
        ));
    }

    Ok(pages)
}

/// Every scalar entry of the trailer `Info` dictionary (title, author, custom
/// fields), keyed by its PDF name without the leading slash.
fn native_metadata(pdf: &lopdf::Document) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::new();
    let Some(info) = info_dictionary(pdf) else {
        return metadata;
    };

    for (key, value) in info.iter() {
        let value = match value {
            Object::String(bytes, _) => decode_pdf_text(bytes),
            Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
            Object::Integer(number) => number.to_string(),
            Object::Real(number) => number.to_string(),
            Object::Boolean(flag) => flag.to_string(),
            _ => continue,
        };
        let value = value.trim();
        if !value.is_empty() {
            metadata.insert(String::from_utf8_lossy(key).into_owned(), value);
        }
    }
    metadata
}

fn info_dictionary(pdf: &lopdf::Document) -> Option<&Dictionary> {
    let info = pdf.trailer.get(b"Info").ok()?;
    let info = match info {
        Object::Reference(id) => pdf.get_object(*id).ok()?,
        direct => direct,
    };
    info.as_dict().ok()
}

/// PDF text strings are UTF-16BE when they start with a byte order mark and
/// PDFDocEncoding (close enough to Latin-1 for metadata) otherwise.
pub fn decode_pdf_text(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        return char::decode_utf16(units)
            .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|byte| char::from(*byte)).collect(),
    }
}
