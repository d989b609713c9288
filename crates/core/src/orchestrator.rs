use crate::artifacts::{SourceDigest, TextArtifactStore};
use crate::chunking::{ChunkOutput, Chunker, ChunkingConfig};
use crate::error::{PipelineError, Result};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::ingest::{DocumentSource, LocalDirectorySource};
use crate::models::{Document, ExtractedText, PipelineConfig};
use crate::normalize::TextNormalizer;
use crate::writer::{ChunkWriter, JsonChunkWriter};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Text,
    Chunks,
}

/// Counts for one chunked document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub pages: usize,
    pub candidates: usize,
    pub filtered: usize,
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Chunked(ChunkStats),
    /// Text stage only.
    Extracted { pages: usize },
    Skipped { kind: &'static str, reason: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    /// Position in the ordered collection.
    pub position: usize,
    pub path: PathBuf,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per listed document, in collection order.
    pub outcomes: Vec<DocumentOutcome>,
}

impl RunReport {
    pub fn documents_total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn documents_processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome.status,
                    DocumentStatus::Chunked(_) | DocumentStatus::Extracted { .. }
                )
            })
            .count()
    }

    pub fn documents_skipped(&self) -> usize {
        self.skipped().count()
    }

    pub fn documents_cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == DocumentStatus::Cancelled)
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&PathBuf, &'static str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            DocumentStatus::Skipped { kind, reason } => Some((&outcome.path, *kind, reason.as_str())),
            _ => None,
        })
    }

    pub fn chunks_written(&self) -> usize {
        self.sum_stats(|stats| stats.written)
    }

    pub fn chunks_filtered(&self) -> usize {
        self.sum_stats(|stats| stats.filtered)
    }

    pub fn chunks_failed(&self) -> usize {
        self.sum_stats(|stats| stats.failed)
    }

    fn sum_stats(&self, field: impl Fn(&ChunkStats) -> usize) -> usize {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                DocumentStatus::Chunked(stats) => Some(field(stats)),
                _ => None,
            })
            .sum()
    }
}

/// Drives extraction, normalization, chunking and writing over a document
/// collection. Cloning is cheap; every component sits behind an `Arc`.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    source: Arc<dyn DocumentSource>,
    extractor: Arc<dyn PdfExtractor>,
    normalizer: Arc<dyn TextNormalizer>,
    chunker: Arc<Chunker>,
    writer: Arc<dyn ChunkWriter>,
    artifacts: Option<Arc<TextArtifactStore>>,
}

impl Pipeline {
    /// Validates `config` and wires the default filesystem components.
    /// Misconfiguration fails here, before any document is touched.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(ChunkingConfig::from(&config))?;
        let normalizer: Arc<dyn TextNormalizer> = Arc::from(config.normalizer.build()?);

        Ok(Self {
            source: Arc::new(LocalDirectorySource::new(config.reports_dir.clone())),
            extractor: Arc::new(LopdfExtractor),
            normalizer,
            chunker: Arc::new(chunker),
            writer: Arc::new(JsonChunkWriter::new(config.chunks_dir.clone())),
            artifacts: config
                .text_dir
                .clone()
                .map(|dir| Arc::new(TextArtifactStore::new(dir))),
            config: Arc::new(config),
        })
    }

    pub fn with_source(mut self, source: impl DocumentSource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn with_normalizer(mut self, normalizer: impl TextNormalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn with_writer(mut self, writer: impl ChunkWriter + 'static) -> Self {
        self.writer = Arc::new(writer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Full run: every document goes through extraction, normalization,
    /// chunking and writing.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        self.run_stage(Stage::Chunks, cancel).await
    }

    /// Text stage only: refreshes the intermediate text artifacts.
    pub async fn extract_all(&self, cancel: CancellationToken) -> Result<RunReport> {
        if self.artifacts.is_none() {
            return Err(PipelineError::InvalidConfig(
                "text extraction needs an intermediate text directory".to_string(),
            ));
        }
        self.run_stage(Stage::Text, cancel).await
    }

    /// Fetches and extracts one document, reusing the saved text artifact when
    /// resuming and neither the PDF bytes nor its annotations changed.
    pub fn extract_document(&self, document: &Document) -> Result<ExtractedText> {
        self.extract_before(document, &CancellationToken::new())
    }

    /// Runs the whole chain for one document. Per-chunk write failures are
    /// counted, not returned.
    pub fn process_document(&self, document: &Document) -> Result<ChunkStats> {
        self.process_before(document, &CancellationToken::new())
    }

    /// Nothing is persisted for `document` once `deadline` has fired.
    fn extract_before(&self, document: &Document, deadline: &CancellationToken) -> Result<ExtractedText> {
        let bytes = self.source.fetch(document)?;
        let source = SourceDigest::of(&bytes, &document.metadata)?;
        let stem = document.stem()?;

        if let Some(store) = self.artifacts.as_deref() {
            if self.config.resume {
                if let Some(extracted) = store.load(stem, &source)? {
                    debug!(path = %document.path.display(), "resumed from text artifact");
                    return Ok(extracted);
                }
            }
        }

        let extracted = self.extractor.extract(document, &bytes)?;
        self.ensure_in_time(deadline)?;

        if let Some(store) = self.artifacts.as_deref() {
            if let Err(error) = store.save(stem, &extracted, &source) {
                warn!(
                    path = %document.path.display(),
                    error = %error,
                    "could not persist text artifact"
                );
            }
        }

        Ok(extracted)
    }

    fn process_before(&self, document: &Document, deadline: &CancellationToken) -> Result<ChunkStats> {
        let extracted = self.extract_before(document, deadline)?;
        let text = self.normalizer.normalize(&extracted.full_text());
        let ChunkOutput { chunks, candidates } =
            self.chunker.chunk(&text, &extracted.source_metadata);
        let stem = document.stem()?;

        let mut stats = ChunkStats {
            pages: extracted.pages.len(),
            candidates,
            filtered: candidates - chunks.len(),
            ..ChunkStats::default()
        };

        for chunk in &chunks {
            self.ensure_in_time(deadline)?;
            match self.writer.write(stem, chunk) {
                Ok(record) => {
                    debug!(record = %record, "chunk written");
                    stats.written += 1;
                }
                Err(error) => {
                    warn!(
                        path = %document.path.display(),
                        sequence_index = chunk.sequence_index,
                        error = %error,
                        "skipping chunk"
                    );
                    stats.failed += 1;
                }
            }
        }

        self.ensure_in_time(deadline)?;
        match self.writer.prune(stem, chunks.len()) {
            Ok(0) => {}
            Ok(removed) => debug!(path = %document.path.display(), removed, "pruned stale chunk records"),
            Err(error) => warn!(path = %document.path.display(), error = %error, "could not prune stale chunk records"),
        }

        Ok(stats)
    }

    fn ensure_in_time(&self, deadline: &CancellationToken) -> Result<()> {
        if deadline.is_cancelled() {
            return Err(PipelineError::Timeout(
                self.config.document_timeout.unwrap_or_default(),
            ));
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, cancel: CancellationToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let documents = self.source.list()?;
        let total = documents.len();

        self.prepare_directories(stage);
        info!(%run_id, documents = total, workers = self.config.workers, "pipeline run started");

        let permits = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut claimed_stems: HashMap<String, PathBuf> = HashMap::new();

        for (position, document) in documents.into_iter().enumerate() {
            if let Some(error) = stem_collision(&mut claimed_stems, &document) {
                warn!(path = %document.path.display(), error = %error, "skipping document");
                outcomes.push(DocumentOutcome {
                    position,
                    path: document.path,
                    status: DocumentStatus::Skipped {
                        kind: error.kind(),
                        reason: error.to_string(),
                    },
                });
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !cancel.is_cancelled()) else {
                outcomes.push(DocumentOutcome {
                    position,
                    path: document.path,
                    status: DocumentStatus::Cancelled,
                });
                continue;
            };

            let pipeline = self.clone();
            tasks.spawn(async move {
                let outcome = pipeline.run_document(stage, position, total, document).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => error!(error = %join_error, "document task aborted"),
            }
        }
        outcomes.sort_by_key(|outcome| outcome.position);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            %run_id,
            processed = report.documents_processed(),
            skipped = report.documents_skipped(),
            cancelled = report.documents_cancelled(),
            chunks = report.chunks_written(),
            "pipeline run finished"
        );
        Ok(report)
    }

    async fn run_document(
        &self,
        stage: Stage,
        position: usize,
        total: usize,
        document: Document,
    ) -> DocumentOutcome {
        let path = document.path.clone();
        let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        if self.config.verbose {
            info!("Extracting text from ({}/{}) {}", position + 1, total, name);
        } else {
            debug!(position = position + 1, total, document = %name, "processing document");
        }

        let pipeline = self.clone();
        let deadline = CancellationToken::new();
        let worker_deadline = deadline.clone();
        let work = tokio::task::spawn_blocking(move || match stage {
            Stage::Text => pipeline
                .extract_before(&document, &worker_deadline)
                .map(|extracted| DocumentStatus::Extracted {
                    pages: extracted.pages.len(),
                }),
            Stage::Chunks => pipeline
                .process_before(&document, &worker_deadline)
                .map(DocumentStatus::Chunked),
        });

        // The blocking task cannot be aborted; the deadline stops it from
        // writing anything once it resumes.
        let joined = match self.config.document_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => joined,
                Err(_) => {
                    deadline.cancel();
                    Ok(Err(PipelineError::Timeout(limit)))
                }
            },
            None => work.await,
        };

        let status = match joined {
            Ok(Ok(status)) => status,
            Ok(Err(error)) => {
                warn!(path = %path.display(), kind = error.kind(), error = %error, "skipping document");
                DocumentStatus::Skipped {
                    kind: error.kind(),
                    reason: error.to_string(),
                }
            }
            Err(join_error) => {
                let error = PipelineError::Worker(join_error.to_string());
                error!(path = %path.display(), error = %error, "document worker failed");
                DocumentStatus::Skipped {
                    kind: error.kind(),
                    reason: error.to_string(),
                }
            }
        };

        if let DocumentStatus::Chunked(stats) = &status {
            let message = format!("Saving {} in {} chunks", name, stats.written);
            if self.config.verbose {
                info!(kept = stats.written, candidates = stats.candidates, "{message}");
            } else {
                debug!(kept = stats.written, candidates = stats.candidates, "{message}");
            }
        }

        DocumentOutcome {
            position,
            path,
            status,
        }
    }

    fn prepare_directories(&self, stage: Stage) {
        if stage == Stage::Chunks {
            if let Err(error) = fs::create_dir_all(&self.config.chunks_dir) {
                warn!(
                    path = %self.config.chunks_dir.display(),
                    error = %error,
                    "cannot create chunk directory; chunk writes will fail"
                );
            }
        }
        if let Some(store) = self.artifacts.as_deref() {
            if let Err(error) = fs::create_dir_all(store.dir()) {
                warn!(path = %store.dir().display(), error = %error, "cannot create text directory");
            }
        }
    }
}

/// Records and text artifacts are named after the stem, so a second document
/// with the same stem (`report.pdf` next to `report.PDF`) would overwrite the
/// first one's output.
fn stem_collision(claimed: &mut HashMap<String, PathBuf>, document: &Document) -> Option<PipelineError> {
    let stem = document.stem().ok()?;
    match claimed.get(stem) {
        Some(owner) => Some(PipelineError::InvalidArgument(format!(
            "output name `{stem}` is already used by {}",
            owner.display()
        ))),
        None => {
            claimed.insert(stem.to_string(), document.path.clone());
            None
        }
    }
}
