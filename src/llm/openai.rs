use super::{CompletionClient, CompletionError, CompletionRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionClient {
    /// Create a client for `model` served at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(http: Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| CompletionError::from_transport("OpenAI", &self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status("OpenAI", status, &body));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CompletionError::InvalidResponse("OpenAI response had no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(server: &MockServer) -> OpenAiCompletionClient {
        OpenAiCompletionClient::new(
            Client::builder()
                .user_agent("reportsynth-test")
                .build()
                .expect("client"),
            server.base_url(),
            "sk-test".into(),
            "gpt-4o-mini".into(),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "Summarize".into(),
            temperature: 0.25,
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model":"gpt-4o-mini","temperature":0.25}"#);
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "  Revenue grew. [r.pdf, p.1]\n" } }
                    ]
                }));
            })
            .await;

        let text = client(&server).complete(request()).await.expect("completion");

        mock.assert_async().await;
        assert_eq!(text, "Revenue grew. [r.pdf, p.1]");
    }

    #[tokio::test]
    async fn rate_limits_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("slow down");
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("429");
        assert!(matches!(error, CompletionError::RateLimited(ref message) if message.contains("slow down")));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn authentication_failures_are_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401).body("invalid api key");
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("401");
        assert!(matches!(error, CompletionError::GenerationFailed(_)));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn empty_choices_are_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client(&server).complete(request()).await.expect_err("no content");
        assert!(matches!(error, CompletionError::InvalidResponse(_)));
    }
}
