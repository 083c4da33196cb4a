use super::{CompletionClient, CompletionError, CompletionRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Client for a local Ollama runtime.
pub struct OllamaCompletionClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaCompletionClient {
    /// Create a client for `model` served at `base_url` (e.g. `http://127.0.0.1:11434`).
    pub fn new(http: Client, base_url: String, model: String) -> Self {
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| CompletionError::from_transport("Ollama", &self.base_url, error))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionError::GenerationFailed(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status("Ollama", status, &body));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(CompletionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(server: &MockServer) -> OllamaCompletionClient {
        OllamaCompletionClient::new(
            Client::builder()
                .user_agent("reportsynth-test")
                .build()
                .expect("client"),
            server.base_url(),
            "llama3.1".into(),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "Summarize".into(),
            temperature: 0.5,
        }
    }

    #[tokio::test]
    async fn passes_temperature_and_trims_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(
                        r#"{"model":"llama3.1","stream":false,"options":{"temperature":0.5}}"#,
                    );
                then.status(200).json_body(json!({
                    "response": " Summary text \n",
                    "done": true
                }));
            })
            .await;

        let summary = client(&server).complete(request()).await.expect("summary");

        mock.assert_async().await;
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("500");
        assert!(matches!(error, CompletionError::ServerError(ref message) if message.contains("500")));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(404);
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("404");
        assert!(matches!(error, CompletionError::GenerationFailed(ref message) if message.contains("llama3.1")));
    }

    #[tokio::test]
    async fn incomplete_responses_are_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("incomplete");
        assert!(matches!(error, CompletionError::InvalidResponse(_)));
    }
}
