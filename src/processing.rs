//! Document-QA pipeline: chunking, caching, map summaries, and the reduce merge.

pub mod cache;
pub mod chunking;
pub mod citations;
pub mod prompts;
mod reduce;
mod service;
pub mod tokens;
pub mod types;

pub use service::{PipelineSettings, SynthesisApi, SynthesisService};
pub use types::{
    Chunk, ChunkSummary, ChunkingError, ExecutiveSummary, ParameterError, PipelineError,
    RunOutcome, RunParameters, Stage,
};
