//! Text-analysis service client.
//!
//! This module provides the interface for sending one batch of articles to
//! an OpenAI-compatible chat-completions endpoint and getting the raw
//! completion text back. Parsing that text is a separate step (see
//! [`crate::enrichment::response`]), so transport failures and malformed
//! payloads are told apart.
//!
//! # Architecture
//!
//! - [`AnalysisService`]: core trait defining one async analysis call
//! - [`ChatCompletionsService`]: reqwest-backed implementation
//!
//! # Attempts
//!
//! A batch gets exactly one live call per run. Service errors are not
//! retried here; the batcher degrades them into fallback records, which are
//! cached so the next run does not pay for the same failure again.

use crate::config::ServiceCredentials;
use crate::error::{ConfigError, ServiceError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// One request to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Sent as the system message.
    pub system_instruction: String,
    /// Sent as the user message; enumerates the batch.
    pub task_instruction: String,
}

/// Trait for async text analysis.
///
/// Implementors send a request to a model and return the raw completion
/// text. The abstraction lets the batcher run against in-memory fakes.
pub trait AnalysisService {
    /// Send the request and return the completion text.
    ///
    /// # Returns
    ///
    /// The model's raw answer, or a [`ServiceError`] if the call itself
    /// failed. An answer that is not the expected JSON is still `Ok`.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError>;
}

impl<S: AnalysisService> AnalysisService for &S {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError> {
        (**self).analyze(request).await
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client (`POST {base_url}/chat/completions`).
///
/// Requests use temperature 0.3 and ask for a JSON object response.
pub struct ChatCompletionsService {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for ChatCompletionsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsService")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ChatCompletionsService {
    pub const TEMPERATURE: f32 = 0.3;

    /// Build the client. Fails only if the HTTP client cannot be created.
    pub fn new(credentials: &ServiceCredentials, timeout: Duration) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent(concat!("news_digest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", credentials.base_url),
            api_key: credentials.api_key.clone(),
            model: credentials.model.clone(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AnalysisService for ChatCompletionsService {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system_instruction,
                },
                Message {
                    role: "user",
                    content: &request.task_instruction,
                },
            ],
            temperature: Self::TEMPERATURE,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.timeout.as_secs())
                } else {
                    ServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Analysis call rejected"
            );
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&text, 300),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ServiceError::Empty)?;

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = content.len(),
            "Analysis call succeeded"
        );
        Ok(content)
    }
}
