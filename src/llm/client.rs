//! Sub-agent dispatch client.
//!
//! The pipeline consumes LLM sub-agents through one narrow interface:
//! `dispatch(task, schema)` returns a schema-validated JSON payload or
//! fails. Tasks are context-isolated; nothing persists between calls.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::schema::{extract_json_object, OutputSchema};

/// One isolated sub-agent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Label for logs and error messages, e.g. `persona:risk-manager`
    pub name: String,
    /// System prompt establishing the role
    pub system: String,
    /// User content: the task plus all context the agent may see
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl AgentTask {
    pub fn new(
        name: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Token usage accumulated across dispatches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Sub-agent provider interface.
#[async_trait]
pub trait SubAgentClient: Send + Sync {
    /// Dispatch a task and return its schema-validated structured output.
    async fn dispatch(&self, task: &AgentTask, schema: &OutputSchema) -> Result<Value>;

    /// Provider name for logs and error attribution.
    fn provider_name(&self) -> &str;

    /// Usage accumulated so far.
    fn usage(&self) -> UsageTotals;
}

/// Token-bucket rate limiter for an externally rate-limited resource.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: tokio::time::Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: tokio::time::Instant::now(),
            }),
        }
    }

    /// Wait until one token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = match self.state.lock() {
                    Ok(s) => s,
                    // A poisoned limiter should throttle nothing
                    Err(_) => return,
                };
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = tokio::time::Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_sec,
                    ))
                }
            };
            match wait {
                Some(duration) => sleep(duration).await,
                None => return,
            }
        }
    }
}

/// Retry policy for provider calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor).round() as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
        }
    }
}

/// Configuration for the Anthropic client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    /// Requests-per-minute budget for the token bucket
    pub requests_per_minute: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            timeout_secs: 120,
            retry: RetryConfig::default(),
            requests_per_minute: 60,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Anthropic messages-API client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
    bucket: TokenBucket,
    usage: Mutex<UsageTotals>,
}

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl AnthropicClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;
        let bucket = TokenBucket::new(
            config.requests_per_minute,
            f64::from(config.requests_per_minute) / 60.0,
        );
        Ok(Self {
            config,
            http,
            bucket,
            usage: Mutex::new(UsageTotals::default()),
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    async fn complete_once(&self, task: &AgentTask, prompt: &str) -> Result<String> {
        self.bucket.acquire().await;

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: task.max_tokens,
            system: task.system.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: task.temperature,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout_secs * 1000)
                } else {
                    Error::llm_api("anthropic", e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Error::llm_api("anthropic", format!("{status}: {message}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_api("anthropic", e.to_string()))?;

        if let Ok(mut usage) = self.usage.lock() {
            usage.calls += 1;
            usage.input_tokens += parsed.usage.input_tokens;
            usage.output_tokens += parsed.usage.output_tokens;
        }

        parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::llm_api("anthropic", "empty response".to_string()))
    }
}

#[async_trait]
impl SubAgentClient for AnthropicClient {
    async fn dispatch(&self, task: &AgentTask, schema: &OutputSchema) -> Result<Value> {
        let base_prompt = format!("{}\n\n{}", task.prompt, schema.prompt_block());
        let mut prompt = base_prompt.clone();
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.config.retry.max_retries {
            if attempt > 0 {
                sleep(self.config.retry.delay_for_attempt(attempt - 1)).await;
            }

            let text = match self.complete_once(task, &prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(task = %task.name, attempt, error = %e, "sub-agent call failed");
                    last_err = Some(e);
                    continue;
                }
            };

            let Some(payload) = extract_json_object(&text) else {
                debug!(task = %task.name, "response contained no JSON object");
                prompt = format!(
                    "{base_prompt}\n\nYour previous reply was not a JSON object. \
                     Reply with only the JSON object."
                );
                last_err = Some(Error::SchemaValidation {
                    task: task.name.clone(),
                    detail: "no JSON object in response".to_string(),
                });
                continue;
            };

            let violations = schema.validate(&payload);
            if violations.is_empty() {
                return Ok(payload);
            }

            let detail = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            debug!(task = %task.name, detail = %detail, "schema violations, retrying");
            prompt = format!(
                "{base_prompt}\n\nYour previous reply had problems: {detail}. \
                 Reply again with a corrected JSON object."
            );
            last_err = Some(Error::SchemaValidation {
                task: task.name.clone(),
                detail,
            });
        }

        Err(last_err.unwrap_or_else(|| Error::llm_api("anthropic", "retries exhausted")))
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn usage(&self) -> UsageTotals {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
