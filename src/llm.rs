use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::SummarizerConfig;
use crate::error::ModelError;
use crate::ratelimit::RateLimiter;

/// Chat message structure for the completions API
#[derive(Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: i32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// One raw request attempt against the completions endpoint. Seam between
/// the retry/throttle envelope and the actual HTTP transport.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn request(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<String, ModelError>;
}

/// Production transport: posts the chat-completions JSON payload to an
/// OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl HttpChatApi {
    pub fn new(config: &SummarizerConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| ModelError::TransientNetwork(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn request(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        let payload = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: max_tokens.min(i32::MAX as usize) as i32,
            stream: false,
        };

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            ModelError::TransientNetwork(format!("completions request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                429 if is_quota_body(&body) => ModelError::QuotaExhausted(body),
                429 => ModelError::RateLimited { retry_after },
                401 | 403 => ModelError::Auth(body),
                402 => ModelError::QuotaExhausted(body),
                _ => ModelError::TransientNetwork(format!("HTTP {}: {}", status, body)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|_| ModelError::EmptyOutput)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(content)
    }
}

/// Some providers report an exhausted quota as a 429 instead of a 402.
/// Inspect the JSON error body; plain substring match for non-JSON bodies.
fn is_quota_body(body: &str) -> bool {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(error) = parsed.get("error") {
            let kind = error.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let message = error.get("message").and_then(|v| v.as_str()).unwrap_or("");
            return kind.contains("quota") || message.to_lowercase().contains("quota");
        }
    }
    body.contains("quota")
}

/// Summarization client used by every stage of a run: wraps one pluggable
/// model endpoint with business logic, no more.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one logical summarization request and return the summary text.
    async fn complete(
        &self,
        instruction: &str,
        content: &str,
        max_tokens: usize,
    ) -> Result<String, ModelError>;
}

/// Resilient envelope around a [`ChatApi`]: shared rate limiter, jittered
/// exponential backoff for transient failures, a single same-prompt retry
/// for empty output, and hard failure for auth/quota errors.
pub struct SummarizerClient<A: ChatApi> {
    api: A,
    limiter: Arc<RateLimiter>,
    config: SummarizerConfig,
    attempts: AtomicUsize,
}

impl<A: ChatApi> SummarizerClient<A> {
    pub fn new(api: A, limiter: Arc<RateLimiter>, config: &SummarizerConfig) -> Self {
        Self {
            api,
            limiter,
            config: config.clone(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Raw request attempts made since this client was created.
    pub fn attempts_made(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    async fn call_with_backoff(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        let mut delays = self.config.retry_delays();

        loop {
            self.limiter.acquire().await;
            self.attempts.fetch_add(1, Ordering::Relaxed);

            match self.api.request(messages, max_tokens).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() => match delays.next() {
                    Some(mut delay) => {
                        // A provider wait hint overrides a shorter backoff
                        if let ModelError::RateLimited {
                            retry_after: Some(hint),
                        } = &err
                        {
                            delay = delay.max(*hint);
                        }
                        warn!("🔁 Model call failed ({}), retrying in {:?}", err, delay);
                        sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "❌ Model call gave up after {} attempts",
                            self.config.max_retry_attempts
                        );
                        return Err(ModelError::Unavailable);
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<A: ChatApi> ModelClient for SummarizerClient<A> {
    async fn complete(
        &self,
        instruction: &str,
        content: &str,
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: instruction.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: content.to_string(),
            },
        ];

        let first = self.call_with_backoff(&messages, max_tokens).await;
        match first {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) | Err(ModelError::EmptyOutput) => {
                debug!("🔁 Model returned empty output, retrying the same prompt once");
            }
            Err(err) => return Err(err),
        }

        match self.call_with_backoff(&messages, max_tokens).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) | Err(ModelError::EmptyOutput) => Err(ModelError::InvalidOutput),
            Err(err) => Err(err),
        }
    }
}
