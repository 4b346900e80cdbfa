//! # Text Completion Service
//!
//! Request/response client for the chat completions endpoint. Each chat query becomes
//! one request with a fixed system prompt followed by the user's text; the first
//! choice's content is the answer.

use crate::config::CompletionConfig;
use crate::error::CompletionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, query: &str) -> Result<String, CompletionError>;
}

/// OpenAI chat completions over HTTP.
#[derive(Clone)]
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    system_prompt: String,
}

impl OpenAiCompletionClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, config: &CompletionConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, query: &str) -> Result<String, CompletionError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: query,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse)?;

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiCompletionClient {
        let mut config = AppConfig::default().completion;
        config.base_url = format!("{}/v1", server.uri());
        OpenAiCompletionClient::new(reqwest::Client::new(), "sk-test", &config)
    }

    #[tokio::test]
    async fn test_first_choice_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant for finding professional partners." },
                    { "role": "user", "content": "who builds websites?" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    { "index": 0, "message": { "role": "assistant", "content": "Partner E does." } },
                    { "index": 1, "message": { "role": "assistant", "content": "ignored" } }
                ]
            })))
            .mount(&server)
            .await;

        let answer = client(&server).complete("who builds websites?").await.unwrap();
        assert_eq!(answer, "Partner E does.");
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server).complete("hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_no_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server).complete("hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }
}
