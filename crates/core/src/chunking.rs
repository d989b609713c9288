//! Sliding-window segmentation, quality filtering and sequence stamping.
//!
//! Sizes are counted in Unicode scalar values (`char`), so a chunk never holds
//! more than `chunk_size` characters regardless of how many bytes they take.

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, DocumentMetadata, PipelineConfig};
use regex::Regex;

pub const DEFAULT_MIN_ALPHA_RATIO: f64 = 0.7;

const HEADING_PATTERN: &str = r"(?m)^#{1,6}[ \t]";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub keep_alpha_chunks: bool,
    pub min_alpha_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 0,
            keep_alpha_chunks: true,
            min_alpha_ratio: DEFAULT_MIN_ALPHA_RATIO,
        }
    }
}

impl From<&PipelineConfig> for ChunkingConfig {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
            keep_alpha_chunks: value.keep_alpha_chunks,
            min_alpha_ratio: value.min_alpha_ratio,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.min_alpha_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_alpha_ratio must be within [0, 1], got {}",
                self.min_alpha_ratio
            )));
        }
        Ok(())
    }
}

/// Result of chunking one document.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    /// Candidates produced by segmentation before the quality filter.
    pub candidates: usize,
}

impl ChunkOutput {
    pub fn filtered(&self) -> usize {
        self.candidates - self.chunks.len()
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    heading: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            heading: Regex::new(HEADING_PATTERN)?,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Segment, filter, then re-index. Empty or whitespace-only text yields
    /// no chunks.
    pub fn chunk(&self, text: &str, metadata: &DocumentMetadata) -> ChunkOutput {
        if text.trim().is_empty() {
            return ChunkOutput::default();
        }

        let candidates = self.split(text);
        let candidate_count = candidates.len();
        let retained = retain_quality_chunks(candidates, &self.config);

        ChunkOutput {
            chunks: assign_sequence(retained, metadata),
            candidates: candidate_count,
        }
    }

    /// Candidate windows, each an exact substring of `text`. Consecutive windows
    /// share exactly `chunk_overlap` characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let headings = self.heading_starts(text, &offsets);

        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let total = chars.len();

        let mut pieces = Vec::new();
        let mut start = 0;
        loop {
            if total - start <= size {
                pieces.push(text[offsets[start]..].to_string());
                break;
            }

            let hard_end = start + size;
            let min_end = start + (size / 2).max(overlap + 1);
            let end = find_boundary(&chars, &headings, start, min_end, hard_end).unwrap_or(hard_end);

            pieces.push(text[offsets[start]..offsets[end]].to_string());
            start = end - overlap;
        }

        pieces
    }

    fn heading_starts(&self, text: &str, offsets: &[usize]) -> Vec<usize> {
        self.heading
            .find_iter(text)
            .filter_map(|found| offsets.binary_search(&found.start()).ok())
            .collect()
    }
}

/// Picks the best split point in `min_end..=hard_end`, trying stronger
/// boundaries first and the latest position within each tier.
fn find_boundary(
    chars: &[char],
    headings: &[usize],
    start: usize,
    min_end: usize,
    hard_end: usize,
) -> Option<usize> {
    if min_end > hard_end {
        return None;
    }

    let before = |end: usize, back: usize| -> Option<char> {
        end.checked_sub(back).filter(|pos| *pos >= start).map(|pos| chars[pos])
    };

    let tiers: [&dyn Fn(usize) -> bool; 5] = [
        &|end: usize| before(end, 1) == Some('\n') && headings.binary_search(&end).is_ok(),
        &|end: usize| before(end, 1) == Some('\n') && before(end, 2) == Some('\n'),
        &|end: usize| before(end, 1) == Some('\n'),
        &|end: usize| {
            before(end, 1).is_some_and(char::is_whitespace)
                && matches!(before(end, 2), Some('.' | '!' | '?'))
        },
        &|end: usize| before(end, 1).is_some_and(char::is_whitespace),
    ];

    tiers
        .iter()
        .find_map(|is_boundary| (min_end..=hard_end).rev().find(|end| is_boundary(*end)))
}

/// Fraction of characters that are alphabetic (Unicode `Alphabetic`).
/// Empty text scores zero.
pub fn alpha_ratio(content: &str) -> f64 {
    let (alpha, total) = content.chars().fold((0usize, 0usize), |(alpha, total), ch| {
        (alpha + usize::from(ch.is_alphabetic()), total + 1)
    });
    if total == 0 {
        return 0.0;
    }
    alpha as f64 / total as f64
}

/// Drops blank candidates always, and low-alpha candidates when
/// `keep_alpha_chunks` is set. Order is preserved.
pub fn retain_quality_chunks(candidates: Vec<String>, config: &ChunkingConfig) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|content| !content.trim().is_empty())
        .filter(|content| !config.keep_alpha_chunks || alpha_ratio(content) >= config.min_alpha_ratio)
        .collect()
}

/// Numbers retained chunks `0..n` and stamps each with the document metadata.
pub fn assign_sequence(retained: Vec<String>, metadata: &DocumentMetadata) -> Vec<Chunk> {
    retained
        .into_iter()
        .enumerate()
        .map(|(sequence_index, content)| Chunk {
            content,
            sequence_index,
            metadata: metadata.clone(),
        })
        .collect()
}

/// One-shot form of [`Chunker::chunk`].
pub fn chunk_text(
    text: &str,
    config: ChunkingConfig,
    metadata: &DocumentMetadata,
) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(config)?.chunk(text, metadata).chunks)
}
