//! Document discovery and page-level text extraction.
//!
//! The loader scans a single directory (no recursion) for `*.pdf` files, extracts text page by
//! page, and tags every page with the file's base name. Files that fail to parse are skipped and
//! reported back to the caller; a missing directory is treated as an empty corpus.

mod pdf;

pub use pdf::PdfPageExtractor;

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Base name of the file the page came from.
    pub source_name: String,
    /// 1-based page number within the source file.
    pub page_number: u32,
    /// Raw extracted text.
    pub text: String,
}

/// A file left out of the corpus because extraction failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    /// Base name of the skipped file.
    pub source_name: String,
    /// Human-readable extraction failure.
    pub reason: String,
}

/// Pages loaded from a directory, plus bookkeeping for the shell's status line.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    /// Pages in file-name order, then page order.
    pub pages: Vec<Page>,
    /// Number of files that were parsed successfully.
    pub document_count: usize,
    /// Files that could not be parsed.
    pub skipped: Vec<SkippedFile>,
}

/// Errors raised while enumerating the document directory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The directory exists but could not be listed.
    #[error("failed to list directory {}: {source}", .path.display())]
    ListDirectory {
        /// Directory that was being scanned.
        path: PathBuf,
        /// Underlying traversal error.
        #[source]
        source: walkdir::Error,
    },
    /// The blocking extraction task panicked or was cancelled.
    #[error("extraction task failed: {0}")]
    Join(String),
}

/// Errors raised by a [`PageExtractor`] for a single file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File could not be read.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// File content is not a PDF the extractor understands.
    #[error("failed to parse PDF: {0}")]
    Pdf(String),
}

/// Synchronous page-text extraction capability for a single file.
pub trait PageExtractor: Send + Sync {
    /// Return the text of every page in order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Loads every page of every PDF in a directory.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Scan `directory` (non-recursively) and extract its pages.
    async fn load(&self, directory: &Path) -> Result<LoadedCorpus, LoadError>;
}

/// Filesystem loader backed by a [`PageExtractor`].
pub struct PdfDirectoryLoader {
    extractor: Arc<dyn PageExtractor>,
}

impl PdfDirectoryLoader {
    /// Loader using the `pdf-extract` backend.
    pub fn new() -> Self {
        Self::with_extractor(Arc::new(PdfPageExtractor))
    }

    /// Loader using a caller-provided extraction backend.
    pub fn with_extractor(extractor: Arc<dyn PageExtractor>) -> Self {
        Self { extractor }
    }
}

impl Default for PdfDirectoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentLoader for PdfDirectoryLoader {
    async fn load(&self, directory: &Path) -> Result<LoadedCorpus, LoadError> {
        let files = discover_pdfs(directory)?;
        let mut corpus = LoadedCorpus::default();

        for path in files {
            let source_name = base_name(&path);
            let extractor = Arc::clone(&self.extractor);
            let task_path = path.clone();
            let extracted = tokio::task::spawn_blocking(move || extractor.extract_pages(&task_path))
                .await
                .map_err(|error| LoadError::Join(error.to_string()))?;

            match extracted {
                Ok(page_texts) => {
                    let before = corpus.pages.len();
                    for (index, text) in page_texts.into_iter().enumerate() {
                        if text.trim().is_empty() {
                            continue;
                        }
                        corpus.pages.push(Page {
                            source_name: source_name.clone(),
                            page_number: u32::try_from(index + 1).unwrap_or(u32::MAX),
                            text,
                        });
                    }
                    corpus.document_count += 1;
                    tracing::debug!(
                        source = %source_name,
                        pages = corpus.pages.len() - before,
                        "Extracted document"
                    );
                }
                Err(error) => {
                    tracing::warn!(source = %source_name, error = %error, "Skipping unreadable PDF");
                    corpus.skipped.push(SkippedFile {
                        source_name,
                        reason: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            directory = %directory.display(),
            documents = corpus.document_count,
            pages = corpus.pages.len(),
            skipped = corpus.skipped.len(),
            "Loaded documents"
        );
        Ok(corpus)
    }
}

/// List `*.pdf` files directly inside `directory`, sorted by file name.
///
/// A missing directory yields an empty list.
pub fn discover_pdfs(directory: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !directory.is_dir() {
        tracing::warn!(directory = %directory.display(), "Document directory not found");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() == 0 => {
                return Err(LoadError::ListDirectory {
                    path: directory.to_path_buf(),
                    source: error,
                });
            }
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_pdf_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
