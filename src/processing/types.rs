//! Core data types and error definitions for the processing pipeline.

use crate::documents::{LoadError, SkippedFile};
use crate::llm::CompletionError;
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// Temperature range offered by the shell.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Chunk-size range (characters) offered by the shell.
pub const CHUNK_SIZE_RANGE: RangeInclusive<usize> = 500..=2000;
/// Chunk-overlap range (characters) offered by the shell.
pub const CHUNK_OVERLAP_RANGE: RangeInclusive<usize> = 0..=500;

/// A bounded slice of one page's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk text; always a contiguous slice of the page text.
    pub text: String,
    /// Base name of the source file.
    pub source_name: String,
    /// 1-based page the chunk was cut from.
    pub page_number: u32,
    /// Position of the chunk in the whole chunk sequence.
    pub chunk_index: usize,
    /// Byte offset of the chunk start within the page text.
    pub start: usize,
    /// Byte offset one past the chunk end within the page text.
    pub end: usize,
}

/// Map-stage output for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Model output, guaranteed to contain `citation_tag`.
    pub text: String,
    /// `[sourceName, p.pageNumber]` of the originating chunk.
    pub citation_tag: String,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutiveSummary {
    /// Merged prose including every citation tag.
    pub text: String,
    /// Distinct citation tags in first-seen order.
    pub citations: Vec<String>,
    /// Number of chunks that went through the map stage.
    pub chunk_count: usize,
    /// Number of source documents in the corpus.
    pub document_count: usize,
    /// RFC 3339 timestamp of completion.
    pub generated_at: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Identifier attached to every log line of the run.
    pub run_id: String,
    /// Number of chunks loaded for the run's parameters.
    pub chunk_count: usize,
    /// Number of documents parsed.
    pub document_count: usize,
    /// Files left out because extraction failed.
    pub skipped: Vec<SkippedFile>,
    /// `None` when there was nothing to summarize.
    pub summary: Option<ExecutiveSummary>,
}

/// Validated, immutable parameters of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    question: String,
    temperature: f32,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RunParameters {
    /// Validate user-supplied parameters against the shell's control ranges.
    pub fn new(
        question: impl Into<String>,
        temperature: f32,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, ParameterError> {
        validate_chunking(chunk_size, chunk_overlap)?;
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(ParameterError::TemperatureOutOfRange(temperature));
        }
        Ok(Self {
            question: question.into(),
            temperature,
            chunk_size,
            chunk_overlap,
        })
    }

    /// Business question, trimmed.
    pub fn question(&self) -> &str {
        self.question.trim()
    }

    /// Sampling temperature for every completion call.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Maximum characters shared by adjacent chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Check a chunk size/overlap pair against the shell's control ranges.
///
/// An overlap that is not smaller than the chunk size is reported before range violations.
pub fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<(), ParameterError> {
    if chunk_overlap >= chunk_size {
        return Err(ParameterError::OverlapTooLarge {
            overlap: chunk_overlap,
            chunk_size,
        });
    }
    if !CHUNK_SIZE_RANGE.contains(&chunk_size) {
        return Err(ParameterError::ChunkSizeOutOfRange(chunk_size));
    }
    if !CHUNK_OVERLAP_RANGE.contains(&chunk_overlap) {
        return Err(ParameterError::ChunkOverlapOutOfRange(chunk_overlap));
    }
    Ok(())
}

/// Run parameters rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    /// Temperature outside `[0.0, 1.0]`.
    #[error("temperature {0} is outside 0.0-1.0")]
    TemperatureOutOfRange(f32),
    /// Chunk size outside `[500, 2000]`.
    #[error("chunk size {0} is outside 500-2000")]
    ChunkSizeOutOfRange(usize),
    /// Chunk overlap outside `[0, 500]`.
    #[error("chunk overlap {0} is outside 0-500")]
    ChunkOverlapOutOfRange(usize),
    /// Overlap must be strictly smaller than the chunk size.
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
}

/// Errors produced while splitting pages into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    /// A zero chunk size cannot hold any text.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must be strictly smaller than the chunk size.
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
}

/// Pipeline stage issuing a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Per-chunk summarization.
    Map,
    /// Intermediate merge of a batch of summaries.
    Collapse,
    /// Final executive summary.
    Reduce,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Map => "map",
            Self::Collapse => "collapse",
            Self::Reduce => "reduce",
        };
        f.write_str(name)
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Run parameters were rejected.
    #[error("Invalid settings: {0}")]
    Configuration(#[from] ParameterError),
    /// No question was supplied.
    #[error("Enter a business question to generate a summary")]
    MissingQuestion,
    /// The document directory could not be scanned.
    #[error("Failed to load documents: {0}")]
    Load(#[from] LoadError),
    /// Pages could not be split.
    #[error("Failed to split documents: {0}")]
    Chunking(#[from] ChunkingError),
    /// The language model backend failed.
    #[error("Language model request failed during {stage}: {source}")]
    Backend {
        /// Stage that issued the failing request.
        stage: Stage,
        /// Underlying provider error.
        #[source]
        source: CompletionError,
    },
    /// The language model backend did not answer in time.
    #[error("Language model request timed out during {stage} after {}s", .after.as_secs())]
    Timeout {
        /// Stage that issued the request.
        stage: Stage,
        /// Per-request timeout that elapsed.
        after: Duration,
    },
    /// The run was aborted by the user.
    #[error("Run cancelled")]
    Cancelled,
    /// Another run is in progress.
    #[error("A summary is already being generated; try again when it finishes")]
    Busy,
    /// The run task panicked.
    #[error("Run failed unexpectedly: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Map a provider error to the pipeline taxonomy.
    pub fn from_completion(stage: Stage, error: CompletionError, timeout: Duration) -> Self {
        match error {
            CompletionError::Timeout => Self::Timeout {
                stage,
                after: timeout,
            },
            source => Self::Backend { stage, source },
        }
    }

    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::Chunking(_) => "configuration",
            Self::MissingQuestion | Self::Load(_) => "input",
            Self::Backend { .. } => "backend",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::Internal(_) => "internal",
        }
    }
}
