//! Per-request configuration.
//!
//! A [`RequestContext`] travels with every call and parameterizes the
//! attempt deadline and the retry policy. It is immutable; callers share it
//! through `Arc<RequestContext>` and derive new contexts instead of mutating.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Defaults
// ============================================================================

/// Default per-attempt inactivity deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Whether retries grow the deadline by default.
pub const DEFAULT_GROW_TIMEOUT_EXPONENTIALLY: bool = true;

/// Default ceiling for a grown deadline.
pub const DEFAULT_MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(900);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;

// ============================================================================
// Request Context
// ============================================================================

/// Immutable configuration carried alongside a request.
///
/// `request_timeout` is an inactivity deadline: an attempt fails once no
/// network activity has been seen for longer than this. `None` disables the
/// deadline entirely.
///
/// [`Clone`] produces a context for a *new* logical request: the policy
/// fields are copied and a fresh [`request_id`](Self::request_id) is
/// generated. Use [`next_attempt`](Self::next_attempt) to derive the context
/// of a retry, which keeps the identity.
pub struct RequestContext {
    request_id: Uuid,
    authentication_token: String,
    request_timeout: Option<Duration>,
    grow_timeout_exponentially: bool,
    max_request_timeout: Duration,
    max_retry_count: u32,
}

impl RequestContext {
    /// Creates a context with default policy and the given token.
    pub fn new(authentication_token: impl Into<String>) -> Self {
        Self::builder()
            .authentication_token(authentication_token)
            .build()
    }

    /// Creates a builder for customizing the context.
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::new()
    }

    /// Creates a context from a deserialized policy block.
    pub fn from_policy(authentication_token: impl Into<String>, policy: &RequestPolicy) -> Self {
        Self::builder()
            .authentication_token(authentication_token)
            .request_timeout(Self::timeout_from_millis(policy.request_timeout_ms))
            .grow_timeout_exponentially(policy.grow_timeout_exponentially)
            .max_request_timeout(Duration::from_millis(policy.max_request_timeout_ms))
            .max_retry_count(policy.max_retry_count)
            .build()
    }

    /// Converts a millisecond timeout where negative means "no deadline".
    pub fn timeout_from_millis(millis: i64) -> Option<Duration> {
        u64::try_from(millis).ok().map(Duration::from_millis)
    }

    /// Unique identity of the logical request.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Authentication token, possibly empty.
    pub fn authentication_token(&self) -> &str {
        &self.authentication_token
    }

    /// Per-attempt inactivity deadline; `None` means no deadline.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Whether retries double the deadline.
    pub fn grow_timeout_exponentially(&self) -> bool {
        self.grow_timeout_exponentially
    }

    /// Ceiling for a grown deadline.
    pub fn max_request_timeout(&self) -> Duration {
        self.max_request_timeout
    }

    /// Number of retries allowed after the first attempt.
    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// Derives the context for a retry of the same logical request.
    ///
    /// The request id is inherited. When growth is enabled the deadline is
    /// doubled and capped at [`max_request_timeout`](Self::max_request_timeout);
    /// a deadline already above the ceiling is left as it is.
    pub fn next_attempt(&self) -> Self {
        let request_timeout = self.request_timeout.map(|timeout| {
            if !self.grow_timeout_exponentially {
                return timeout;
            }
            let grown = timeout.saturating_mul(2).min(self.max_request_timeout);
            grown.max(timeout)
        });

        Self {
            request_id: self.request_id,
            authentication_token: self.authentication_token.clone(),
            request_timeout,
            grow_timeout_exponentially: self.grow_timeout_exponentially,
            max_request_timeout: self.max_request_timeout,
            max_retry_count: self.max_retry_count,
        }
    }

    /// Returns the token with everything but its last four characters hidden.
    fn masked_token(&self) -> String {
        let chars: Vec<char> = self.authentication_token.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }
}

impl Clone for RequestContext {
    fn clone(&self) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            authentication_token: self.authentication_token.clone(),
            request_timeout: self.request_timeout,
            grow_timeout_exponentially: self.grow_timeout_exponentially,
            max_request_timeout: self.max_request_timeout,
            max_retry_count: self.max_retry_count,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("authentication_token", &self.masked_token())
            .field("request_timeout", &self.request_timeout)
            .field("grow_timeout_exponentially", &self.grow_timeout_exponentially)
            .field("max_request_timeout", &self.max_request_timeout)
            .field("max_retry_count", &self.max_retry_count)
            .finish()
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RequestContext:")?;
        writeln!(f, "    request id = {}", self.request_id)?;
        writeln!(f, "    authentication token = {}", self.masked_token())?;
        match self.request_timeout {
            Some(timeout) => writeln!(f, "    request timeout = {}ms", timeout.as_millis())?,
            None => writeln!(f, "    request timeout = none")?,
        }
        writeln!(
            f,
            "    increase request timeout exponentially = {}",
            if self.grow_timeout_exponentially { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "    max request timeout = {}ms",
            self.max_request_timeout.as_millis()
        )?;
        writeln!(f, "    max request retry count = {}", self.max_retry_count)
    }
}

// ============================================================================
// Request Context Builder
// ============================================================================

/// Builder for constructing a [`RequestContext`].
#[derive(Debug, Clone)]
pub struct RequestContextBuilder {
    authentication_token: String,
    request_timeout: Option<Duration>,
    grow_timeout_exponentially: bool,
    max_request_timeout: Duration,
    max_retry_count: u32,
}

impl RequestContextBuilder {
    /// Creates a builder populated with the default policy.
    pub fn new() -> Self {
        Self {
            authentication_token: String::new(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            grow_timeout_exponentially: DEFAULT_GROW_TIMEOUT_EXPONENTIALLY,
            max_request_timeout: DEFAULT_MAX_REQUEST_TIMEOUT,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        }
    }

    /// Sets the authentication token.
    pub fn authentication_token(mut self, token: impl Into<String>) -> Self {
        self.authentication_token = token.into();
        self
    }

    /// Sets the inactivity deadline; `None` disables it.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables deadline growth across retries.
    pub fn grow_timeout_exponentially(mut self, enabled: bool) -> Self {
        self.grow_timeout_exponentially = enabled;
        self
    }

    /// Sets the ceiling for a grown deadline.
    pub fn max_request_timeout(mut self, timeout: Duration) -> Self {
        self.max_request_timeout = timeout;
        self
    }

    /// Sets the number of retries after the first attempt.
    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    /// Builds the context with a freshly generated request id.
    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: Uuid::new_v4(),
            authentication_token: self.authentication_token,
            request_timeout: self.request_timeout,
            grow_timeout_exponentially: self.grow_timeout_exponentially,
            max_request_timeout: self.max_request_timeout,
            max_retry_count: self.max_retry_count,
        }
    }
}

impl Default for RequestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Request Policy
// ============================================================================

/// Serializable request policy, for embedding in application config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Inactivity deadline in milliseconds; negative disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: i64,
    /// Whether retries double the deadline.
    #[serde(default = "default_grow")]
    pub grow_timeout_exponentially: bool,
    /// Ceiling for a grown deadline in milliseconds.
    #[serde(default = "default_max_request_timeout_ms")]
    pub max_request_timeout_ms: u64,
    /// Number of retries after the first attempt.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
}

fn default_request_timeout_ms() -> i64 {
    i64::try_from(DEFAULT_REQUEST_TIMEOUT.as_millis()).unwrap_or(i64::MAX)
}

fn default_grow() -> bool {
    DEFAULT_GROW_TIMEOUT_EXPONENTIALLY
}

fn default_max_request_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_MAX_REQUEST_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

fn default_max_retry_count() -> u32 {
    DEFAULT_MAX_RETRY_COUNT
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            grow_timeout_exponentially: default_grow(),
            max_request_timeout_ms: default_max_request_timeout_ms(),
            max_retry_count: default_max_retry_count(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
