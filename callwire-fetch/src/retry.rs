//! Retry orchestration for calls.
//!
//! The engine itself never retries. [`call_with_retry`] is the thin loop on
//! top: it builds a fresh [`CompletionFuture`] per attempt, deriving each
//! retry context with [`RequestContext::next_attempt`] (same request id,
//! timeout grown up to the configured ceiling), and stops after
//! `max_retry_count` retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use callwire_core::{CallError, RequestContext};

use crate::future::{Completion, CompletionFuture};

/// Delay policy between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Whether to double the delay for each further retry.
    pub exponential_backoff: bool,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl RetryStrategy {
    /// Creates a strategy with exponential backoff from `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            exponential_backoff: true,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Retries immediately.
    pub fn no_delay() -> Self {
        Self {
            base_delay: Duration::ZERO,
            exponential_backoff: false,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Enables or disables exponential backoff.
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 2u32.saturating_pow(retry.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };

        delay.min(self.max_delay)
    }

    /// Whether a failed attempt should be retried.
    ///
    /// Transport failures (timeouts included) are retried; protocol and
    /// decode errors are final.
    pub fn should_retry(&self, error: &CallError) -> bool {
        error.is_retryable()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::no_delay()
    }
}

/// Runs a call, retrying retryable failures up to the context's
/// `max_retry_count`.
///
/// `make_attempt` receives the context for each attempt and must return a
/// freshly built future. The returned completion is that of the last attempt.
pub async fn call_with_retry<T, F>(
    strategy: &RetryStrategy,
    context: Arc<RequestContext>,
    mut make_attempt: F,
) -> Completion<T>
where
    T: Clone + Send + 'static,
    F: FnMut(Arc<RequestContext>) -> CompletionFuture<T>,
{
    let max_retries = context.max_retry_count();
    let mut context = context;
    let mut retry = 0;

    loop {
        let attempt = make_attempt(context.clone());
        let completion = attempt.finished().await;

        let Some(error) = completion.error() else {
            return completion;
        };
        if retry >= max_retries || !strategy.should_retry(error) {
            debug!(
                request_id = %context.request_id(),
                retries = retry,
                error = %error,
                "Giving up on request"
            );
            return completion;
        }

        retry += 1;
        let delay = strategy.delay_for_attempt(retry);
        warn!(
            request_id = %context.request_id(),
            retry,
            max_retries,
            delay = ?delay,
            error = %error,
            "Retrying request"
        );

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        context = Arc::new(context.next_attempt());
    }
}
