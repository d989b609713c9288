pub mod artifacts;
pub mod chunking;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use artifacts::{SourceDigest, TextArtifactStore};
pub use chunking::{
    alpha_ratio, assign_sequence, chunk_text, retain_quality_chunks, ChunkOutput, Chunker,
    ChunkingConfig, DEFAULT_MIN_ALPHA_RATIO,
};
pub use error::{PipelineError, Result};
pub use extractor::{decode_pdf_text, LopdfExtractor, PdfExtractor, PAGE_COUNT_KEY};
pub use ingest::{discover_pdf_files, DocumentSource, LocalDirectorySource, SOURCE_KEY};
pub use models::{
    Chunk, ChunkRecord, Document, DocumentMetadata, ExtractedText, PipelineConfig,
    PAGE_CONTENT_KEY, SEQUENCE_INDEX_KEY,
};
pub use normalize::{IdentityNormalizer, NormalizerKind, TextNormalizer, WhitespaceNormalizer};
pub use orchestrator::{ChunkStats, DocumentOutcome, DocumentStatus, Pipeline, RunReport};
pub use writer::{record_identifier, ChunkWriter, JsonChunkWriter};
pub use tokio_util::sync::CancellationToken;
