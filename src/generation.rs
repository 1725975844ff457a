//! Generation service abstraction and implementations.
//!
//! Defines the [`GenerationService`] trait the pipeline drives and its
//! concrete implementations:
//! - **[`DisabledService`]** — returns errors; used when generation is not configured.
//! - **[`OpenAiService`]** — any OpenAI-compatible chat-completions endpoint,
//!   in single-response and SSE streaming modes.
//!
//! # Timeouts
//!
//! Every call is bounded at this boundary. [`GenerationService::complete`]
//! times out as a whole; a stream from
//! [`GenerationService::complete_streaming`] times out when no fragment
//! arrives within the configured window. Both surface
//! [`GenerationError::Timeout`].
//!
//! # Provider Selection
//!
//! ```rust
//! # use repo_scribe::config::GenerationConfig;
//! # use repo_scribe::generation::create_service;
//! let config = GenerationConfig::default(); // provider = "disabled"
//! let service = create_service(&config).unwrap();
//! assert_eq!(service.name(), "disabled");
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use tokio::time::Instant;
use tracing::debug;

use crate::config::GenerationConfig;

/// A stream of generated text fragments.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Failures a caller may want to branch on.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation call timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("generation API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation service returned an empty response")]
    EmptyResponse,
    #[error("generation network error: {0}")]
    Network(String),
}

/// The external text-generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Short identifier used in logs (e.g. the model name).
    fn name(&self) -> &str;

    /// Single-response completion.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Streaming completion. Fragments arrive in order.
    async fn complete_streaming(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Concatenate every fragment of a stream, failing on the first error.
pub async fn collect_stream(stream: FragmentStream) -> Result<String> {
    stream
        .try_fold(String::new(), |mut acc, fragment| async move {
            acc.push_str(&fragment);
            Ok::<_, anyhow::Error>(acc)
        })
        .await
}

// ============ Disabled Service ============

/// A service that always fails.
///
/// Used when `generation.provider = "disabled"`.
pub struct DisabledService;

#[async_trait]
impl GenerationService for DisabledService {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled; set [generation] provider in the config")
    }

    async fn complete_streaming(&self, _prompt: &str) -> Result<FragmentStream> {
        bail!("Generation provider is disabled; set [generation] provider in the config")
    }
}

// ============ OpenAI-compatible Service ============

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiService {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not set or the API key variable named
    /// by `api_key_env` is missing from the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = temperature.into();
        }
        body
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response)
    }

    fn timeout_error(&self) -> GenerationError {
        GenerationError::Timeout {
            secs: self.timeout.as_secs(),
        }
    }
}

#[async_trait]
impl GenerationService for OpenAiService {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = async {
            let response = self.send(prompt, false).await?;
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| GenerationError::Network(e.to_string()))?;
            parse_completion(&json)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error().into()),
        }
    }

    async fn complete_streaming(&self, prompt: &str) -> Result<FragmentStream> {
        let response = match tokio::time::timeout(self.timeout, self.send(prompt, true)).await {
            Ok(response) => response?,
            Err(_) => return Err(self.timeout_error().into()),
        };

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_fragments(bytes, self.timeout))
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(GenerationError::EmptyResponse.into());
    }
    Ok(content.to_string())
}

/// One parsed server-sent-events line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Interpret a single SSE line from a streaming chat-completions response.
pub fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(json) => match json
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            Some(content) if !content.is_empty() => SseEvent::Fragment(content.to_string()),
            _ => SseEvent::Skip,
        },
        Err(e) => {
            debug!(error = %e, "Skipping unparsable stream line");
            SseEvent::Skip
        }
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
    timeout: Duration,
    /// Moves forward only when a fragment is emitted; keep-alives and other
    /// skipped lines do not extend it.
    deadline: Instant,
}

impl SseState {
    /// Move every complete line out of the buffer into `pending`.
    fn drain_lines(&mut self, flush: bool) {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if self.accept(&line) {
                return;
            }
        }
        if flush && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.accept(&line);
        }
    }

    /// Returns true once the terminator has been seen.
    fn accept(&mut self, line: &[u8]) -> bool {
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            SseEvent::Fragment(fragment) => {
                self.pending.push_back(fragment);
                false
            }
            SseEvent::Done => {
                self.done = true;
                true
            }
            SseEvent::Skip => false,
        }
    }
}

/// Turn a raw SSE byte stream into text fragments.
///
/// The stream fails with [`GenerationError::Timeout`] when `timeout` passes
/// without a new fragment, however many comment or empty lines arrive. Lines are split on byte boundaries first so multi-byte characters split
/// across network chunks decode intact.
pub fn sse_fragments(
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    timeout: Duration,
) -> FragmentStream {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
        timeout,
        deadline: Instant::now() + timeout,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                st.deadline = Instant::now() + st.timeout;
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }

            match tokio::time::timeout_at(st.deadline, st.bytes.next()).await {
                Err(_) => {
                    st.done = true;
                    let err = GenerationError::Timeout {
                        secs: st.timeout.as_secs(),
                    };
                    return Some((Err(err.into()), st));
                }
                Ok(None) => {
                    st.drain_lines(true);
                    st.done = true;
                }
                Ok(Some(Err(e))) => {
                    st.done = true;
                    let err = GenerationError::Network(e.to_string());
                    return Some((Err(err.into()), st));
                }
                Ok(Some(Ok(chunk))) => {
                    st.buffer.extend_from_slice(&chunk);
                    st.drain_lines(false);
                }
            }
        }
    })
    .boxed()
}

/// Create the appropriate [`GenerationService`] based on configuration.
///
/// | Config Value | Service |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledService`] |
/// | `"openai"` | [`OpenAiService`] |
pub fn create_service(config: &GenerationConfig) -> Result<Box<dyn GenerationService>> {
    if !config.is_enabled() {
        return Ok(Box::new(DisabledService));
    }
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiService::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
