//! HTTP client retry utilities for service-to-service communication.
//!
//! Provides configurable retry logic with exponential backoff for calls to
//! external HTTP services.

use crate::error::AppError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the specified max retries.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a config with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let with_jitter = if self.add_jitter {
            capped * rand::thread_rng().gen_range(0.8..1.2)
        } else {
            capped
        };
        Duration::from_secs_f64(with_jitter)
    }
}

/// Only transient upstream failures are worth retrying; everything else is
/// either a caller error or a deterministic failure.
fn is_retryable(error: &AppError) -> bool {
    matches!(error, AppError::ExternalService(_))
}

/// Execute an HTTP call with retries according to `config`.
///
/// `call` must produce an owned future per invocation (clone the request
/// pieces it needs), so each attempt starts from a clean slate.
pub async fn retry_http_call<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut call: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if is_retryable(&error) && attempt < config.max_retries => {
                let backoff = config.backoff_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Retryable call failed, backing off"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
