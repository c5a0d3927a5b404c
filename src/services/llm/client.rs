use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::types::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::CompletionError;

/// One call to an external text-completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError>;
}

/// Backoff delay, injected so tests can observe delays without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed attempt numbered `attempt` (0-based):
    /// `base * 2^attempt` plus up to `base` of jitter, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=base_ms));
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
}

/// Process-lifetime token counters. Only `reset` lowers them.
#[derive(Debug, Default)]
pub struct UsageMeter {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
}

impl UsageMeter {
    pub fn record(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        UsageSnapshot {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            calls: self.calls.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.calls.store(0, Ordering::Relaxed);
    }
}

/// Retrying wrapper around a [`CompletionService`].
pub struct CompletionClient {
    service: Arc<dyn CompletionService>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    timeout: Duration,
    usage: UsageMeter,
}

impl CompletionClient {
    pub fn new(service: Arc<dyn CompletionService>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            service,
            sleeper: Arc::new(TokioSleeper),
            policy,
            timeout,
            usage: UsageMeter::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub fn reset_usage(&self) {
        self.usage.reset();
    }

    /// Sends `request`, retrying rate limits and transient failures with
    /// exponential backoff. Cancellation is observed before every attempt and
    /// before every backoff sleep, and interrupts both.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.service.complete(request)) => result,
            };

            let error = match outcome {
                Ok(Ok(response)) => {
                    self.usage.record(&response.usage);
                    tracing::debug!(
                        "completion succeeded on attempt {} ({} tokens)",
                        attempt,
                        response.usage.total()
                    );
                    return Ok(response.text);
                }
                Ok(Err(e)) => e,
                Err(_) => CompletionError::TransientService(format!(
                    "no response within {:?}",
                    self.timeout
                )),
            };

            if !error.is_retryable() {
                tracing::error!("completion failed with a non-retryable error: {}", error);
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::error!("completion gave up after {} attempts: {}", attempt, error);
                return Err(CompletionError::Failed {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt - 1);
            tracing::warn!(
                "attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                max_attempts,
                error,
                delay
            );

            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }
}
