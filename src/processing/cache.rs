//! Process-wide cache of loaded and split documents.
//!
//! Entries are keyed by `(directory, chunk_size, chunk_overlap)` and never evicted; callers
//! invalidate explicitly. Each key owns a `OnceCell`, so concurrent requests for the same key
//! wait for a single loader while other keys proceed independently. A failed load leaves the
//! cell empty and the next request retries.

use super::types::Chunk;
use crate::documents::SkippedFile;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Composite key of the loader and chunker parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Document directory as supplied by the caller.
    pub directory: PathBuf,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
}

impl CacheKey {
    /// Build a key from its parts.
    pub fn new(directory: &Path, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            chunk_size,
            chunk_overlap,
        }
    }
}

/// Loader + chunker output retained between runs.
#[derive(Debug, Clone, Default)]
pub struct CachedCorpus {
    /// Chunks in file, page, then position order.
    pub chunks: Vec<Chunk>,
    /// Number of documents parsed.
    pub document_count: usize,
    /// Files that could not be parsed.
    pub skipped: Vec<SkippedFile>,
}

type Slot = Arc<OnceCell<Arc<CachedCorpus>>>;

/// Memoizing store for [`CachedCorpus`] values.
#[derive(Default)]
pub struct ChunkCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
}

impl ChunkCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached corpus for `key`, running `init` only when nothing is stored yet.
    ///
    /// The boolean is `true` when the value came from the cache.
    pub async fn get_or_try_init<F, Fut, E>(
        &self,
        key: CacheKey,
        init: F,
    ) -> Result<(Arc<CachedCorpus>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedCorpus, E>>,
    {
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key).or_default())
        };

        let loaded = AtomicBool::new(false);
        let loaded_ref = &loaded;
        let corpus = slot
            .get_or_try_init(move || async move {
                loaded_ref.store(true, Ordering::Relaxed);
                init().await.map(Arc::new)
            })
            .await?;

        Ok((Arc::clone(corpus), !loaded.load(Ordering::Relaxed)))
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
