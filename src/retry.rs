//! # Rate-Limit Controller
//!
//! Decides whether a failed reasoning call should be retried and how long to
//! wait before doing so. Classification is message based: the reasoning
//! backends surface rate limiting in many shapes (HTTP 429, token-per-minute
//! errors reported as 413/400, provider specific codes), and the one thing they
//! share is the wording of the error.
//!
//! ## Key Components
//!
//! - `is_rate_limit_failure`: marker based classification of an error
//! - `next_delay` / `await_retry`: exponential backoff with jitter
//! - `Pacer`: fixed delay applied before every reasoning request
//! - `CallOutcome`: tagged result of one call (success, retryable, fatal)
//! - `run_with_retry`: drives a call through the policy

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Substrings (lowercase) that mark an error as a transient rate limit.
pub const RATE_LIMIT_MARKERS: [&str; 5] = [
    "rate limit",
    "rate_limit",
    "tpm",
    "tokens per minute",
    "limit exceeded",
];

/// Returns true iff the error message contains one of [`RATE_LIMIT_MARKERS`],
/// ignoring case.
pub fn is_rate_limit_failure<E: fmt::Display + ?Sized>(error: &E) -> bool {
    let message = error.to_string().to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Retry settings handed to each stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,

    /// Base delay doubled on every retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Raised when a call is still rate limited after every allowed retry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded after {max_attempts} retries")]
pub struct RetryExhausted {
    pub max_attempts: u32,
}

/// Backoff for the given attempt: `base * 2^attempt` plus a uniform jitter in `[0, 1)` seconds.
pub fn next_delay(attempt: u32, base_delay: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    let jitter = rand::thread_rng().gen_range(0.0..1.0);
    base_delay
        .saturating_mul(factor)
        .saturating_add(Duration::from_secs_f64(jitter))
}

/// Sleep for the backoff of `attempt` and return the next attempt number.
///
/// Fails with [`RetryExhausted`] without sleeping when `attempt` already
/// reached `policy.max_attempts`.
pub async fn await_retry(attempt: u32, policy: &RetryPolicy) -> Result<u32, RetryExhausted> {
    if attempt >= policy.max_attempts {
        return Err(RetryExhausted {
            max_attempts: policy.max_attempts,
        });
    }

    let delay = next_delay(attempt, policy.base_delay);
    warn!(
        "Rate limit hit, waiting {:.1} seconds (retry {}/{})",
        delay.as_secs_f64(),
        attempt + 1,
        policy.max_attempts
    );
    tokio::time::sleep(delay).await;
    Ok(attempt + 1)
}

/// Fixed wait inserted before every reasoning request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// A pacer that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        debug!(
            "Waiting {} seconds before next API call to prevent rate limiting",
            self.delay.as_secs_f64()
        );
        tokio::time::sleep(self.delay).await;
    }
}

/// Outcome of a single call at the reasoning-service boundary
#[derive(Debug)]
pub enum CallOutcome<T, E> {
    Success(T),
    /// Transient rate limit; inspected and retried by the caller
    Retryable(E),
    /// Anything else; never retried
    Fatal(E),
}

impl<T, E: fmt::Display> CallOutcome<T, E> {
    pub fn classify(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(e) if is_rate_limit_failure(&e) => CallOutcome::Retryable(e),
            Err(e) => CallOutcome::Fatal(e),
        }
    }
}

/// Terminal failure of [`run_with_retry`]
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Non-rate-limit failure, returned after the first attempt
    #[error(transparent)]
    Fatal(E),

    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),
}

/// Run `call` until it succeeds, fails with a non-rate-limit error, or the
/// policy runs out of retries. The closure receives the current attempt number.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match CallOutcome::classify(call(attempt).await) {
            CallOutcome::Success(value) => return Ok(value),
            CallOutcome::Fatal(e) => return Err(RetryError::Fatal(e)),
            CallOutcome::Retryable(e) => {
                debug!("Retryable failure on attempt {}: {}", attempt, e);
                attempt = await_retry(attempt, policy).await?;
            }
        }
    }
}
