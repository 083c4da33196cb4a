#![deny(missing_docs)]

//! Core library for the Report Synthesizer.

/// Environment-driven configuration management.
pub mod config;
/// PDF discovery and page-level text extraction.
pub mod documents;
/// Completion client abstraction and provider adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Chunking, caching, and map-reduce summarization.
pub mod processing;
/// Interactive web shell and JSON API.
pub mod shell;
