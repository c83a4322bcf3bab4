//! External language model endpoint.
//!
//! The retry policy for transient model errors lives here, inside the
//! tool; callers only ever distinguish terminal from non-terminal
//! faults.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docsmith_core::{Fault, FaultKind};

use crate::run_state::ModelUsage;

use super::{ModelClient, ModelReply, ToolResult};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Retry policy for transient model errors: exponential backoff with
/// deterministic jitter, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the first call (R_model).
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        // Deterministic "jitter" keyed off the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Run `call` with the policy, retrying transient faults only.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> ToolResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ToolResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(fault)
                if matches!(
                    fault.kind,
                    FaultKind::ModelUnavailable | FaultKind::ModelRateLimited
                ) && attempt < policy.retries =>
            {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    kind = %fault.kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient model error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(fault) => return Err(fault),
        }
    }
}

// ── Messages API wire types ──

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Client for the Anthropic messages endpoint.
pub struct AnthropicModelClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicModelClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_API_BASE)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicModelClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> ToolResult<ModelReply> {
        if self.api_key.is_empty() {
            return Err(Fault::with_detail(
                FaultKind::ModelRejected,
                "model API key not configured",
            ));
        }

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            temperature: 0.3,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::ModelUnavailable, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Fault::new(FaultKind::ModelRateLimited));
        }
        if status.is_server_error() {
            return Err(Fault::with_detail(
                FaultKind::ModelUnavailable,
                format!("HTTP {status}"),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Fault::with_detail(
                FaultKind::ModelRejected,
                format!("HTTP {status}: {}", body.chars().take(120).collect::<String>()),
            ));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::ModelUnavailable, e.to_string()))?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();

        Ok(ModelReply {
            text,
            usage: ModelUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_without_jitter() {
        let policy = RetryPolicy {
            retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn transient_faults_are_retried_then_succeed() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        };

        let result = with_retries(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Fault::new(FaultKind::ModelRateLimited))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_faults_exhaust_the_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        };

        let result: ToolResult<&str> = with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Fault::new(FaultKind::ModelUnavailable)) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FaultKind::ModelUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_faults_surface_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: ToolResult<&str> = with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Fault::new(FaultKind::ModelRejected)) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FaultKind::ModelRejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected_without_a_network_call() {
        let client = AnthropicModelClient::new("", "claude-sonnet-4-20250514");
        let err = client.complete("hi", 100).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::ModelRejected);
    }
}
