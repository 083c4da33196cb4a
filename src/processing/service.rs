//! Synthesis service coordinating loading, chunking, and the map-reduce summary.

use crate::{
    config::Config,
    documents::{DocumentLoader, PdfDirectoryLoader},
    llm::{
        CompletionClient, CompletionError, CompletionRequest, RetryPolicy, build_completion_client,
        complete_with_retry,
    },
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        cache::{CacheKey, CachedCorpus, ChunkCache},
        chunking::split_pages,
        citations::{append_missing_sources, citation_tag, ensure_citation, extract_citation_tags},
        prompts::{build_map_prompt, build_reduce_prompt},
        reduce::{Digest, batch_citations, joined_tokens, plan_batches},
        tokens::{TokenCounter, build_token_counter},
        types::{
            Chunk, ChunkSummary, ExecutiveSummary, PipelineError, RunOutcome, RunParameters, Stage,
            validate_chunking,
        },
    },
};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::path::Path;
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::Instrument;
use uuid::Uuid;

/// Tunables of the map and reduce stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Maximum number of in-flight completion requests.
    pub map_concurrency: usize,
    /// Token budget of a single reduce prompt's summaries.
    pub reduce_token_max: usize,
    /// Timeout and retry behaviour of each completion.
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            map_concurrency: 4,
            reduce_token_max: 3000,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            map_concurrency: config.map_concurrency.max(1),
            reduce_token_max: config.reduce_token_max.max(1),
            retry: RetryPolicy {
                timeout: config.llm_timeout(),
                max_retries: config.llm_max_retries,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Runs the document-QA pipeline: load, split, summarize each chunk, merge.
///
/// The service owns the loader, completion client, chunk cache, and metrics so that the web
/// shell and the CLI share the same components. Construct it once and share it through an
/// `Arc`.
pub struct SynthesisService {
    loader: Arc<dyn DocumentLoader>,
    client: Arc<dyn CompletionClient>,
    cache: ChunkCache,
    token_counter: TokenCounter,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait SynthesisApi: Send + Sync {
    /// Execute a full run over the documents in `directory`.
    async fn run(
        &self,
        directory: &Path,
        params: &RunParameters,
    ) -> Result<RunOutcome, PipelineError>;

    /// Forget every cached chunk list. Returns the number of entries dropped.
    fn clear_cache(&self) -> usize;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl SynthesisService {
    /// Assemble a service from explicit components.
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        client: Arc<dyn CompletionClient>,
        token_counter: TokenCounter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            loader,
            client,
            cache: ChunkCache::new(),
            token_counter,
            settings,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build the production service from configuration.
    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        let client = build_completion_client(config)?;
        let token_counter = build_token_counter(config.llm_provider, &config.llm_model);
        let settings = PipelineSettings::from_config(config);
        tracing::debug!(
            map_concurrency = settings.map_concurrency,
            reduce_token_max = settings.reduce_token_max,
            timeout_secs = settings.retry.timeout.as_secs(),
            max_retries = settings.retry.max_retries,
            "Pipeline settings"
        );
        Ok(Self::new(
            Arc::new(PdfDirectoryLoader::new()),
            client,
            token_counter,
            settings,
        ))
    }

    /// Load and split the documents of `directory`, reusing cached chunks when available.
    ///
    /// Parameters are validated before anything is read, so an invalid combination never
    /// touches the loader or the cache.
    pub async fn load_chunks(
        &self,
        directory: &Path,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Arc<CachedCorpus>, PipelineError> {
        validate_chunking(chunk_size, chunk_overlap)?;

        let key = CacheKey::new(directory, chunk_size, chunk_overlap);
        let (corpus, hit) = self
            .cache
            .get_or_try_init(key, move || async move {
                let loaded = self.loader.load(directory).await?;
                let chunks = split_pages(&loaded.pages, chunk_size, chunk_overlap)?;
                Ok::<_, PipelineError>(CachedCorpus {
                    chunks,
                    document_count: loaded.document_count,
                    skipped: loaded.skipped,
                })
            })
            .await?;

        self.metrics.record_cache_lookup(hit);
        tracing::info!(
            chunks = corpus.chunks.len(),
            documents = corpus.document_count,
            chunk_size,
            chunk_overlap,
            cache_hit = hit,
            "Chunks ready"
        );
        Ok(corpus)
    }

    /// Drop the cached chunks of one parameter combination.
    pub fn invalidate_cache(&self, directory: &Path, chunk_size: usize, chunk_overlap: usize) -> bool {
        self.cache
            .invalidate(&CacheKey::new(directory, chunk_size, chunk_overlap))
    }

    /// Forget every cached chunk list.
    pub fn clear_cache(&self) -> usize {
        let dropped = self.cache.clear();
        tracing::info!(entries = dropped, "Chunk cache cleared");
        dropped
    }

    /// Summarize a single chunk, guaranteeing its citation tag is present.
    pub async fn summarize_chunk(
        &self,
        chunk: &Chunk,
        params: &RunParameters,
    ) -> Result<ChunkSummary, PipelineError> {
        let tag = citation_tag(&chunk.source_name, chunk.page_number);
        let prompt = build_map_prompt(chunk, params.question());
        let text = self.complete(Stage::Map, prompt, params.temperature()).await?;
        if !text.contains(&tag) {
            tracing::debug!(chunk = chunk.chunk_index, tag = %tag, "Appending missing citation");
        }
        Ok(ChunkSummary {
            text: ensure_citation(&text, &tag),
            citation_tag: tag,
        })
    }

    /// Summarize every chunk with bounded concurrency, preserving chunk order.
    ///
    /// The first failure aborts the stage and cancels the remaining requests.
    pub async fn map_chunks(
        &self,
        chunks: &[Chunk],
        params: &RunParameters,
    ) -> Result<Vec<ChunkSummary>, PipelineError> {
        let pending: Vec<_> = chunks
            .iter()
            .map(|chunk| self.summarize_chunk(chunk, params))
            .collect();
        let summaries: Vec<ChunkSummary> = stream::iter(pending)
            .buffered(self.settings.map_concurrency)
            .try_collect()
            .await?;
        self.metrics.record_chunks_summarized(summaries.len() as u64);
        tracing::info!(summaries = summaries.len(), "Map stage complete");
        Ok(summaries)
    }

    /// Merge chunk summaries into the executive summary text and its citations.
    ///
    /// Summaries that do not fit the token budget are collapsed in batches first; any citation
    /// the model drops along the way is appended under a `Sources:` line.
    pub async fn reduce(
        &self,
        summaries: Vec<ChunkSummary>,
        params: &RunParameters,
    ) -> Result<(String, Vec<String>), PipelineError> {
        let mut digests: Vec<Digest> = summaries
            .into_iter()
            .map(|summary| Digest::from_summary(summary.text, summary.citation_tag))
            .collect();
        let citations = batch_citations(&digests);

        let budget = self.settings.reduce_token_max;
        let mut round = 0;
        while digests.len() > 1 && joined_tokens(&digests, &self.token_counter) > budget {
            let batches = plan_batches(&digests, budget, &self.token_counter);
            if batches.len() == digests.len() {
                tracing::warn!(
                    summaries = digests.len(),
                    budget,
                    "Summaries exceed the reduce budget individually; merging as-is"
                );
                break;
            }
            round += 1;
            tracing::debug!(round, from = digests.len(), to = batches.len(), "Collapsing summaries");

            let current = &digests;
            let collapsed: Vec<Digest> = stream::iter(batches)
                .map(|batch| self.collapse(&current[batch], params))
                .buffered(self.settings.map_concurrency)
                .try_collect()
                .await?;
            digests = collapsed;
        }

        let prompt = build_reduce_prompt(digests.iter().map(|d| d.text.as_str()), params.question());
        let text = self.complete(Stage::Reduce, prompt, params.temperature()).await?;

        let unknown: Vec<String> = extract_citation_tags(&text)
            .into_iter()
            .filter(|tag| !citations.contains(tag))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!(tags = ?unknown, "Summary cites sources that were not provided");
        }

        Ok((append_missing_sources(&text, &citations), citations))
    }

    /// Execute a full run over the documents in `directory`.
    pub async fn run(
        &self,
        directory: &Path,
        params: &RunParameters,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.metrics.record_run_started();
        let mut record = RunRecord {
            metrics: &self.metrics,
            run_id: run_id.clone(),
            finished: false,
        };

        let result = self.execute(run_id, directory, params).instrument(span).await;
        record.finished = true;
        match &result {
            Ok(_) => self.metrics.record_run_completed(),
            Err(error) => {
                self.metrics.record_run_failed();
                tracing::warn!(error = %error, kind = error.kind(), "Run failed");
            }
        }
        result
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn execute(
        &self,
        run_id: String,
        directory: &Path,
        params: &RunParameters,
    ) -> Result<RunOutcome, PipelineError> {
        if params.question().is_empty() {
            return Err(PipelineError::MissingQuestion);
        }
        tracing::info!(
            directory = %directory.display(),
            temperature = params.temperature(),
            chunk_size = params.chunk_size(),
            chunk_overlap = params.chunk_overlap(),
            "Run started"
        );

        let corpus = self
            .load_chunks(directory, params.chunk_size(), params.chunk_overlap())
            .await?;
        let mut outcome = RunOutcome {
            run_id,
            chunk_count: corpus.chunks.len(),
            document_count: corpus.document_count,
            skipped: corpus.skipped.clone(),
            summary: None,
        };
        if corpus.chunks.is_empty() {
            tracing::info!("No chunks to summarize");
            return Ok(outcome);
        }

        let summaries = self.map_chunks(&corpus.chunks, params).await?;
        let (text, citations) = self.reduce(summaries, params).await?;
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        tracing::info!(
            chunks = outcome.chunk_count,
            citations = citations.len(),
            "Run completed"
        );
        outcome.summary = Some(ExecutiveSummary {
            text,
            citations,
            chunk_count: outcome.chunk_count,
            document_count: outcome.document_count,
            generated_at,
        });
        Ok(outcome)
    }

    async fn collapse(
        &self,
        batch: &[Digest],
        params: &RunParameters,
    ) -> Result<Digest, PipelineError> {
        if let [single] = batch {
            return Ok(single.clone());
        }
        let prompt = build_reduce_prompt(batch.iter().map(|d| d.text.as_str()), params.question());
        let text = self
            .complete(Stage::Collapse, prompt, params.temperature())
            .await?;
        Ok(Digest {
            text,
            citations: batch_citations(batch),
        })
    }

    async fn complete(
        &self,
        stage: Stage,
        prompt: String,
        temperature: f32,
    ) -> Result<String, PipelineError> {
        let request = CompletionRequest {
            prompt,
            temperature,
        };
        let policy = &self.settings.retry;
        complete_with_retry(self.client.as_ref(), &request, policy, |_| {
            self.metrics.record_llm_request();
        })
        .await
        .map_err(|error| PipelineError::from_completion(stage, error, policy.timeout))
    }
}

#[async_trait]
impl SynthesisApi for SynthesisService {
    async fn run(
        &self,
        directory: &Path,
        params: &RunParameters,
    ) -> Result<RunOutcome, PipelineError> {
        SynthesisService::run(self, directory, params).await
    }

    fn clear_cache(&self) -> usize {
        SynthesisService::clear_cache(self)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        SynthesisService::metrics_snapshot(self)
    }
}

/// Counts a run as cancelled when its future is dropped before completion.
struct RunRecord<'a> {
    metrics: &'a PipelineMetrics,
    run_id: String,
    finished: bool,
}

impl Drop for RunRecord<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.record_run_cancelled();
            tracing::info!(run_id = %self.run_id, "Run cancelled");
        }
    }
}
