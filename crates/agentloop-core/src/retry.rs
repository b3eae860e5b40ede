//! Provider retry with exponential backoff
//!
//! The agent loop never retries model calls itself. Wrap a provider in
//! `RetryingProvider` to get capped exponential backoff on transient
//! failures (`UpstreamUnavailable`, `RateLimited`, IO).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::provider::{Completion, CompletionStream, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo};
use crate::tool::ToolSchema;

/// Backoff policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Growth factor between retries
    pub multiplier: f64,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap = self.max_backoff.as_nanos() as f64;
        let nanos = (self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent))
            .clamp(0.0, cap);
        Duration::from_nanos(nanos as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        error = %err,
                        "Transient provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Decorator adding retries to any provider
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        self.inner.info().await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.policy
            .run("complete", || self.inner.complete(messages, tools, options))
            .await
    }

    /// Only opening the stream is retried; a stream that fails midway
    /// surfaces its error to the consumer.
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        self.policy
            .run("complete_stream", || {
                self.inner.complete_stream(messages, tools, options)
            })
            .await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.policy.run("list_models", || self.inner.list_models()).await
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        self.inner.estimate_tokens(text)
    }
}
