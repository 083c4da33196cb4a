use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use reportsynth::{
    documents::{ExtractionError, PageExtractor, PdfDirectoryLoader},
    llm::{
        CompletionClient, CompletionError, CompletionRequest, OpenAiCompletionClient, RetryPolicy,
    },
    processing::{
        PipelineError, PipelineSettings, RunParameters, Stage, SynthesisService,
        tokens::whitespace_token_counter,
    },
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Reads UTF-8 files as pages separated by form feeds and counts extractions.
#[derive(Default)]
struct TextPages {
    calls: AtomicUsize,
}

impl PageExtractor for TextPages {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = fs::read_to_string(path)?;
        Ok(raw.split('\u{c}').map(str::to_string).collect())
    }
}

/// Replies to map prompts with a fixed sentence and to merge prompts with a fixed overview.
#[derive(Default)]
struct ScriptedModel {
    prompts: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
    slow_on: Option<(&'static str, Duration)>,
    finished: Mutex<Vec<String>>,
    flaky_first: AtomicUsize,
    stall: bool,
}

const MAP_REPLY: &str = "Noted.";
const REDUCE_REPLY: &str = "Overall the market is expanding.";

#[async_trait]
impl CompletionClient for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some((marker, delay)) = self.slow_on
            && request.prompt.contains(marker)
        {
            tokio::time::sleep(delay).await;
        }
        if self.flaky_first.load(Ordering::SeqCst) > 0 {
            self.flaky_first.fetch_sub(1, Ordering::SeqCst);
            return Err(CompletionError::ServerError("503 warming up".into()));
        }
        if let Some(marker) = self.fail_on
            && request.prompt.contains(marker)
        {
            return Err(CompletionError::GenerationFailed("content rejected".into()));
        }
        self.finished.lock().unwrap().push(request.prompt.clone());
        if request.prompt.starts_with("You are a research assistant.") {
            Ok(MAP_REPLY.into())
        } else {
            Ok(REDUCE_REPLY.into())
        }
    }
}

impl ScriptedModel {
    fn reduce_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|prompt| prompt.starts_with("You are a head analyst."))
            .cloned()
            .collect()
    }
}

fn corpus(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, content) in files {
        fs::write(dir.path().join(name), content).expect("write fixture");
    }
    dir
}

fn service_with(
    extractor: Arc<TextPages>,
    model: Arc<dyn CompletionClient>,
    settings: PipelineSettings,
) -> SynthesisService {
    SynthesisService::new(
        Arc::new(PdfDirectoryLoader::with_extractor(extractor)),
        model,
        whitespace_token_counter(),
        settings,
    )
}

fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 1,
            base_backoff: Duration::from_millis(1),
        },
        ..PipelineSettings::default()
    }
}

fn params(question: &str) -> RunParameters {
    RunParameters::new(question, 0.0, 800, 150).expect("valid parameters")
}

#[tokio::test]
async fn summary_cites_the_single_source_page() {
    let dir = corpus(&[("report.pdf", "The market grew 12% year over year.")]);
    let model = Arc::new(ScriptedModel::default());
    let service = service_with(Arc::new(TextPages::default()), model.clone(), fast_settings());

    let outcome = service
        .run(dir.path(), &params("How fast is the market growing?"))
        .await
        .expect("run succeeds");

    assert_eq!(outcome.chunk_count, 1);
    assert_eq!(outcome.document_count, 1);
    let summary = outcome.summary.expect("summary");
    assert!(summary.text.contains("[report.pdf, p.1]"));
    assert_eq!(summary.citations, vec!["[report.pdf, p.1]"]);

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[0].contains("The market grew 12% year over year."));
    assert!(prompts[0].contains("How fast is the market growing?"));
}

#[tokio::test]
async fn summaries_reach_the_reduce_prompt_in_source_order() {
    let dir = corpus(&[
        ("b.pdf", "Beta only page."),
        ("a.pdf", "Alpha first page.\u{c}Alpha second page."),
    ]);
    let model = Arc::new(ScriptedModel::default());
    let service = service_with(Arc::new(TextPages::default()), model.clone(), fast_settings());

    let outcome = service.run(dir.path(), &params("q")).await.expect("run");
    assert_eq!(outcome.chunk_count, 3);
    assert_eq!(outcome.document_count, 2);

    let reduce = model.reduce_prompts();
    assert_eq!(reduce.len(), 1);
    let expected = format!(
        "{MAP_REPLY} [a.pdf, p.1]\n\n{MAP_REPLY} [a.pdf, p.2]\n\n{MAP_REPLY} [b.pdf, p.1]"
    );
    assert!(reduce[0].contains(&expected), "unexpected prompt: {}", reduce[0]);

    let summary = outcome.summary.expect("summary");
    assert_eq!(
        summary.citations,
        vec!["[a.pdf, p.1]", "[a.pdf, p.2]", "[b.pdf, p.1]"]
    );
    assert!(summary.text.starts_with(REDUCE_REPLY));
    assert!(summary.text.ends_with("Sources: [a.pdf, p.1] [a.pdf, p.2] [b.pdf, p.1]"));
}

#[tokio::test]
async fn slow_early_chunks_keep_their_place_in_the_reduce_prompt() {
    let dir = corpus(&[
        ("b.pdf", "Beta only page."),
        ("a.pdf", "Alpha first page.\u{c}Alpha second page."),
    ]);
    let model = Arc::new(ScriptedModel {
        slow_on: Some(("Alpha first page.", Duration::from_millis(150))),
        ..ScriptedModel::default()
    });
    let settings = PipelineSettings {
        map_concurrency: 3,
        retry: RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            base_backoff: Duration::from_millis(1),
        },
        ..PipelineSettings::default()
    };
    let service = service_with(Arc::new(TextPages::default()), model.clone(), settings);

    let outcome = service.run(dir.path(), &params("q")).await.expect("run");

    let finished = model.finished.lock().unwrap().clone();
    let slow_position = finished
        .iter()
        .position(|prompt| prompt.contains("Alpha first page."))
        .expect("slow chunk summarized");
    assert_eq!(slow_position, 2, "first chunk should finish after the others");

    let reduce = model.reduce_prompts();
    let expected = format!(
        "{MAP_REPLY} [a.pdf, p.1]\n\n{MAP_REPLY} [a.pdf, p.2]\n\n{MAP_REPLY} [b.pdf, p.1]"
    );
    assert!(reduce[0].contains(&expected), "unexpected prompt: {}", reduce[0]);
    assert_eq!(
        outcome.summary.expect("summary").citations,
        vec!["[a.pdf, p.1]", "[a.pdf, p.2]", "[b.pdf, p.1]"]
    );
}

#[tokio::test]
async fn dropped_runs_are_counted_as_cancelled() {
    let dir = corpus(&[("a.pdf", "Alpha.")]);
    let model = Arc::new(ScriptedModel {
        stall: true,
        ..ScriptedModel::default()
    });
    let settings = PipelineSettings {
        retry: RetryPolicy {
            timeout: Duration::from_secs(3600),
            max_retries: 0,
            base_backoff: Duration::from_millis(1),
        },
        ..PipelineSettings::default()
    };
    let service = service_with(Arc::new(TextPages::default()), model, settings);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), service.run(dir.path(), &params("q"))).await;
    assert!(abandoned.is_err());

    let metrics = service.metrics_snapshot();
    assert_eq!(metrics.runs_started, 1);
    assert_eq!(metrics.runs_cancelled, 1);
    assert_eq!(metrics.runs_completed + metrics.runs_failed, 0);
}

#[tokio::test]
async fn unchanged_parameters_reuse_loaded_chunks() {
    let dir = corpus(&[("a.pdf", "Alpha."), ("b.pdf", "Beta.")]);
    let extractor = Arc::new(TextPages::default());
    let service = service_with(
        Arc::clone(&extractor),
        Arc::new(ScriptedModel::default()),
        fast_settings(),
    );

    service.run(dir.path(), &params("q")).await.expect("first run");
    service.run(dir.path(), &params("another q")).await.expect("second run");
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);

    let resized = RunParameters::new("q", 0.0, 900, 150).expect("valid parameters");
    service.run(dir.path(), &resized).await.expect("third run");
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);

    let metrics = service.metrics_snapshot();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 2);
    assert_eq!(metrics.runs_completed, 3);
}

#[tokio::test]
async fn overlap_not_below_chunk_size_is_a_configuration_error() {
    assert!(RunParameters::new("q", 0.0, 500, 600).is_err());

    let dir = corpus(&[("a.pdf", "Alpha.")]);
    let extractor = Arc::new(TextPages::default());
    let service = service_with(
        Arc::clone(&extractor),
        Arc::new(ScriptedModel::default()),
        fast_settings(),
    );

    let error = service
        .load_chunks(dir.path(), 500, 600)
        .await
        .expect_err("overlap rejected");
    assert!(matches!(error, PipelineError::Configuration(_)));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_directory_reports_zero_chunks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::default());
    let service = service_with(Arc::new(TextPages::default()), model.clone(), fast_settings());

    let outcome = service.run(dir.path(), &params("q")).await.expect("run");
    assert_eq!(outcome.chunk_count, 0);
    assert_eq!(outcome.document_count, 0);
    assert!(outcome.summary.is_none());
    assert!(model.prompts.lock().unwrap().is_empty());

    let missing = service
        .run(&dir.path().join("absent"), &params("q"))
        .await
        .expect("missing directory is not an error");
    assert_eq!(missing.chunk_count, 0);
}

#[tokio::test]
async fn one_failed_chunk_aborts_the_run() {
    let dir = corpus(&[("a.pdf", "Fine page.\u{c}POISON page.\u{c}Another fine page.")]);
    let model = Arc::new(ScriptedModel {
        fail_on: Some("POISON"),
        ..ScriptedModel::default()
    });
    let extractor = Arc::new(TextPages::default());
    let service = service_with(Arc::clone(&extractor), model.clone(), fast_settings());

    let error = service.run(dir.path(), &params("q")).await.expect_err("run fails");
    assert!(matches!(
        error,
        PipelineError::Backend {
            stage: Stage::Map,
            ..
        }
    ));
    assert_eq!(error.kind(), "backend");
    assert!(model.reduce_prompts().is_empty());

    // Cached chunks survive the failure.
    service.load_chunks(dir.path(), 800, 150).await.expect("cached");
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.metrics_snapshot().runs_failed, 1);
}

#[tokio::test]
async fn transient_backend_errors_are_retried() {
    let dir = corpus(&[("a.pdf", "Alpha.")]);
    let model = Arc::new(ScriptedModel {
        flaky_first: AtomicUsize::new(1),
        ..ScriptedModel::default()
    });
    let service = service_with(Arc::new(TextPages::default()), model.clone(), fast_settings());

    let outcome = service.run(dir.path(), &params("q")).await.expect("retry succeeds");
    assert!(outcome.summary.is_some());
    // map attempt, map retry, reduce
    assert_eq!(service.metrics_snapshot().llm_requests, 3);
}

#[tokio::test]
async fn stalled_backend_surfaces_a_timeout() {
    let dir = corpus(&[("a.pdf", "Alpha.")]);
    let model = Arc::new(ScriptedModel {
        stall: true,
        ..ScriptedModel::default()
    });
    let settings = PipelineSettings {
        retry: RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 0,
            base_backoff: Duration::from_millis(1),
        },
        ..PipelineSettings::default()
    };
    let service = service_with(Arc::new(TextPages::default()), model, settings);

    let error = service.run(dir.path(), &params("q")).await.expect_err("timeout");
    assert!(matches!(
        error,
        PipelineError::Timeout {
            stage: Stage::Map,
            ..
        }
    ));
    assert_eq!(error.kind(), "timeout");
}

#[tokio::test]
async fn openai_backend_drives_a_full_run() {
    let server = MockServer::start_async().await;
    let map = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("research assistant");
            then.status(200).json_body(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Prices fell [r.pdf, p.1]." } }]
            }));
        })
        .await;
    let reduce = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("head analyst");
            then.status(200).json_body(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Prices are falling [r.pdf, p.1]." } }]
            }));
        })
        .await;

    let client = OpenAiCompletionClient::new(
        reqwest::Client::new(),
        server.base_url(),
        "sk-test".into(),
        "gpt-4o-mini".into(),
    );
    let dir = corpus(&[("r.pdf", "Average selling prices declined.")]);
    let service = service_with(
        Arc::new(TextPages::default()),
        Arc::new(client),
        fast_settings(),
    );

    let outcome = service.run(dir.path(), &params("Where are prices going?")).await.expect("run");

    map.assert_async().await;
    reduce.assert_async().await;
    let summary = outcome.summary.expect("summary");
    assert_eq!(summary.text, "Prices are falling [r.pdf, p.1].");
}
