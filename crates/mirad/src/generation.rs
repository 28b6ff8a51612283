//! Generation dependency client and its fault-tolerant gate.
//!
//! The engine never talks to the text-generation service directly: every
//! call goes through `GenerationGate`, which acquires a circuit-breaker
//! permit, applies the call timeout, and resolves every failure mode to a
//! deterministic static fallback. A rejection from the breaker is not a
//! failure and is not counted as one.

use crate::breaker::CircuitBreaker;
use crate::config::GenerationConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mira_common::GenerationOutcome;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One chat message for the generation dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call knobs. The configured model is used unless overridden.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub model: Option<String>,
}

/// Seam over the generation dependency, so tests and offline deployments
/// can substitute a fake.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<String>;

    /// Cheap reachability probe; advisory only.
    async fn is_available(&self) -> bool;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// HTTP client for an ollama-style chat endpoint.
pub struct HttpGenerationClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpGenerationClient {
    pub fn new(cfg: &GenerationConfig) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_seconds))
                .build()
                .unwrap_or_default(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let model = params.model.as_deref().unwrap_or(&self.model);
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        debug!(model, messages = messages.len(), "generation call");

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("failed to send generation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("generation dependency returned {}: {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("failed to parse generation response")?;

        Ok(chat_response.message.content)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.http_client.get(&url).send().await.is_ok()
    }
}

/// Circuit-breaker-guarded entry point for all generation calls.
pub struct GenerationGate {
    breaker: Arc<CircuitBreaker>,
    backend: Arc<dyn GenerationBackend>,
    call_timeout: Duration,
}

impl GenerationGate {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        backend: Arc<dyn GenerationBackend>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            breaker,
            backend,
            call_timeout,
        }
    }

    /// Produce text for the user, falling back to `fallback` on rejection,
    /// failure, or timeout. Never errors: the caller always gets something
    /// to show.
    pub async fn generate_or_fallback(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        fallback: &str,
    ) -> GenerationOutcome {
        let permit = match self.breaker.acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                info!(reason = %rejection, "generation rejected, using fallback");
                return GenerationOutcome::fallback(fallback);
            }
        };

        match timeout(self.call_timeout, self.backend.generate(messages, params)).await {
            Ok(Ok(text)) => {
                permit.success();
                GenerationOutcome::generated(text)
            }
            Ok(Err(e)) => {
                permit.failure();
                warn!(error = %e, "generation failed, using fallback");
                GenerationOutcome::fallback(fallback)
            }
            Err(_) => {
                permit.failure();
                warn!(
                    timeout_secs = self.call_timeout.as_secs_f64(),
                    "generation timed out, using fallback"
                );
                GenerationOutcome::fallback(fallback)
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }
}
