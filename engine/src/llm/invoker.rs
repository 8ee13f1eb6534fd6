//! Fault-tolerant model invocation
//!
//! [`ModelInvoker`] is the only suspending step of the interaction pipeline.
//! Every attempt is bounded by a timeout, transient failures are retried with
//! capped exponential backoff, and a shared [`CircuitBreaker`] stops hammering
//! a provider that keeps failing. The caller never sees a provider error: when
//! no answer can be produced the supplied fallback text is returned instead.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::{LLMError, LLMProvider, Message};
use crate::config::ResilienceConfig;

/// Sampling parameters for one generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Why the fallback text was returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The breaker rejected the call (possibly after some attempts)
    CircuitOpen,
    /// Every allowed attempt failed with a transient error
    RetriesExhausted,
    /// The provider returned an error that retrying cannot fix
    NonTransient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum InvocationOutcome {
    Generated,
    Fallback(FallbackReason),
}

/// Result of [`ModelInvoker::invoke`]
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub outcome: InvocationOutcome,
    /// Provider calls actually made
    pub attempts: u32,
}

impl Invocation {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Fallback(_))
    }

    fn fallback(text: &str, reason: FallbackReason, attempts: u32) -> Self {
        Self {
            text: text.to_string(),
            outcome: InvocationOutcome::Fallback(reason),
            attempts,
        }
    }
}

/// Provider wrapper with timeout, retry and circuit breaking
pub struct ModelInvoker {
    provider: Arc<dyn LLMProvider>,
    breaker: CircuitBreaker,
    config: ResilienceConfig,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn LLMProvider>, config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.cooldown());
        Self {
            provider,
            breaker,
            config,
        }
    }

    /// Breaker state, for diagnostics
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Delay before retry number `attempt` (1-based count of failed attempts)
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.config.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.config.max_backoff_ms))
    }

    /// Generate a completion, or return `fallback`
    pub async fn invoke(
        &self,
        messages: &[Message],
        params: &GenerationParams,
        fallback: &str,
    ) -> Invocation {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            let Some(permit) = self.breaker.try_acquire() else {
                tracing::warn!(
                    "Circuit open for provider '{}', returning fallback after {} attempts",
                    self.provider.name(),
                    attempts
                );
                return Invocation::fallback(fallback, FallbackReason::CircuitOpen, attempts);
            };

            attempts += 1;
            let call = self
                .provider
                .generate(messages, params.temperature, params.max_tokens);
            let result = match tokio::time::timeout(self.config.call_timeout(), call).await {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout),
            };

            match result {
                Ok(text) => {
                    permit.success();
                    tracing::debug!(
                        "Provider '{}' answered on attempt {}",
                        self.provider.name(),
                        attempts
                    );
                    return Invocation {
                        text,
                        outcome: InvocationOutcome::Generated,
                        attempts,
                    };
                }
                Err(e) => {
                    permit.failure();
                    tracing::warn!(
                        "Provider '{}' attempt {}/{} failed: {}",
                        self.provider.name(),
                        attempts,
                        max_attempts,
                        e
                    );

                    if !e.is_transient() {
                        return Invocation::fallback(
                            fallback,
                            FallbackReason::NonTransient,
                            attempts,
                        );
                    }
                    if attempts >= max_attempts {
                        return Invocation::fallback(
                            fallback,
                            FallbackReason::RetriesExhausted,
                            attempts,
                        );
                    }
                    if self.breaker.state() != CircuitState::Closed {
                        tracing::warn!("Circuit opened mid-retry, abandoning remaining attempts");
                        return Invocation::fallback(
                            fallback,
                            FallbackReason::CircuitOpen,
                            attempts,
                        );
                    }

                    tokio::time::sleep(self.backoff(attempts)).await;
                }
            }
        }
    }
}
