use crate::error::ModelLoadError;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, ModelLoadError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    None,
    Linear { max_attempts: u32, delay_ms: u64 },
    Exponential { max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64 },
}

impl RetryStrategy {
    /// Exponential backoff with `retries` extra attempts after the first
    pub fn for_fetch(retries: u32) -> Self {
        if retries == 0 {
            RetryStrategy::None
        } else {
            RetryStrategy::Exponential {
                max_attempts: retries + 1,
                base_delay_ms: 250,
                max_delay_ms: 4_000,
            }
        }
    }

    fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::None => 1,
            RetryStrategy::Linear { max_attempts, .. }
            | RetryStrategy::Exponential { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    fn delay_before(&self, retry: u32) -> Duration {
        match self {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Linear { delay_ms, .. } => Duration::from_millis(*delay_ms),
            RetryStrategy::Exponential { base_delay_ms, max_delay_ms, .. } => {
                let factor = 1u64 << retry.saturating_sub(1).min(20);
                Duration::from_millis(base_delay_ms.saturating_mul(factor).min(*max_delay_ms))
            }
        }
    }
}

/// Retry executor for recoverable model fetches
pub struct RetryExecutor {
    strategy: RetryStrategy,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    /// Execute an operation, retrying only errors that report themselves recoverable
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = self.strategy.max_attempts();
        let mut attempt = 1;

        loop {
            debug!("Attempt {} of {}", attempt, max_attempts);

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_recoverable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    let delay = self.strategy.delay_before(attempt);
                    warn!("Attempt {} failed: {}, retrying in {}ms", attempt, err, delay.as_millis());
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
