use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};

use crate::error::BotError;
use crate::Result;

/// Bounded exponential backoff shared by every network call
///
/// Attempt `n` (1-based) is followed by a wait of
/// `initial_delay_ms * backoff_factor^(n-1)`, capped at `max_delay_ms`.
/// Each attempt runs under `call_timeout_ms`; a timeout counts as a
/// retryable failure like any other transient error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: u32,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            backoff_factor: 2,
            max_delay_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Constant delay between attempts (used for cache polling)
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            backoff_factor: 1,
            max_delay_ms: delay_ms,
            call_timeout_ms: Self::default().call_timeout_ms,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Wait applied after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = (self.backoff_factor.max(1) as u64).saturating_pow(exponent);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// All waits a fully failing operation goes through
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_for(a)).collect()
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error: Option<BotError> = None;

        for attempt in 1..=attempts {
            let result = match timeout(self.call_timeout(), op()).await {
                Ok(result) => result,
                Err(_) => Err(BotError::Timeout),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("✓ {} succeeded after {} attempts", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!("{} failed permanently: {}", operation, e);
                    return Err(e);
                }
                Err(e) => {
                    if attempt < attempts {
                        let wait = self.delay_for(attempt);
                        tracing::warn!(
                            "Attempt {}/{} of {} failed: {}. Retrying in {:?}...",
                            attempt,
                            attempts,
                            operation,
                            e,
                            wait
                        );
                        last_error = Some(e);
                        sleep(wait).await;
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(
            "{} abandoned after {} attempts: {}",
            operation,
            attempts,
            last_error
        );

        Err(BotError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
            last_error,
        })
    }

    /// Poll a non-blocking source until it yields a value
    ///
    /// Returns `None` once all attempts have come back empty. An empty
    /// source is a normal condition (cold cache), not an error.
    pub async fn poll<T, F>(&self, operation: &str, mut probe: F) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(value) = probe() {
                return Some(value);
            }
            tracing::debug!("{}: nothing yet (attempt {}/{})", operation, attempt, attempts);
            if attempt < attempts {
                sleep(self.delay_for(attempt)).await;
            }
        }

        None
    }
}
