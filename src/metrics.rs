use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    chunks_summarized: AtomicU64,
    llm_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a pipeline run.
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that produced a result (including empty corpora).
    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that ended with an error.
    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that was dropped before it finished.
    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the number of chunks that went through the map stage.
    pub fn record_chunks_summarized(&self, count: u64) {
        self.chunks_summarized.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a single completion request sent to the backend (retries included).
    pub fn record_llm_request(&self) {
        self.llm_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk-cache lookup outcome.
    pub fn record_cache_lookup(&self, hit: bool) {
        let counter = if hit {
            &self.cache_hits
        } else {
            &self.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            llm_requests: self.llm_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Runs triggered since startup.
    pub runs_started: u64,
    /// Runs that rendered a result.
    pub runs_completed: u64,
    /// Runs that ended in an error.
    pub runs_failed: u64,
    /// Runs aborted before they finished.
    pub runs_cancelled: u64,
    /// Chunks sent through the map stage.
    pub chunks_summarized: u64,
    /// Completion requests issued, retries included.
    pub llm_requests: u64,
    /// Chunk-cache lookups served from memory.
    pub cache_hits: u64,
    /// Chunk-cache lookups that loaded and split documents.
    pub cache_misses: u64,
}
