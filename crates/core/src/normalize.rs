//! Cleanup seam between raw extracted text and the chunker.
//!
//! Every normalizer must be total and idempotent: `normalize(normalize(x))`
//! equals `normalize(x)` for all inputs.

use crate::error::PipelineError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

/// Pass-through; the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityNormalizer;

impl TextNormalizer for IdentityNormalizer {
    fn normalize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Layout cleanup that keeps paragraph structure intact.
#[derive(Debug, Clone)]
pub struct WhitespaceNormalizer {
    trailing_space: Regex,
    blank_runs: Regex,
}

impl WhitespaceNormalizer {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            trailing_space: Regex::new(r"(?m)[ \t]+$")?,
            blank_runs: Regex::new(r"\n{3,}")?,
        })
    }
}

impl TextNormalizer for WhitespaceNormalizer {
    fn normalize(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n").replace(['\r', '\u{a0}'], " ");
        let text = self.trailing_space.replace_all(&text, "");
        self.blank_runs.replace_all(&text, "\n\n").into_owned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NormalizerKind {
    #[default]
    Identity,
    Whitespace,
}

impl NormalizerKind {
    pub fn build(self) -> Result<Box<dyn TextNormalizer>, PipelineError> {
        Ok(match self {
            Self::Identity => Box::new(IdentityNormalizer),
            Self::Whitespace => Box::new(WhitespaceNormalizer::new()?),
        })
    }
}

impl FromStr for NormalizerKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Self::Identity),
            "whitespace" => Ok(Self::Whitespace),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown normalizer `{other}` (expected identity or whitespace)"
            ))),
        }
    }
}

impl fmt::Display for NormalizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Whitespace => f.write_str("whitespace"),
        }
    }
}
