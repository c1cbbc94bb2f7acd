//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Library version, used in the default user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default interval between watchdog checks, in milliseconds.
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 1000;

/// Returns the default `User-Agent` header value.
pub fn user_agent() -> String {
    format!("callwire/{VERSION}")
}

/// Settings for the HTTP transport.
///
/// Everything here is injected into the transport at construction time;
/// there is no process-wide proxy or user agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Overrides the default `User-Agent`.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Proxy URL applied to every request.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Connection establishment timeout in milliseconds.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Interval between watchdog checks in milliseconds.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
}

fn default_watchdog_interval_ms() -> u64 {
    DEFAULT_WATCHDOG_INTERVAL_MS
}

impl TransportSettings {
    /// Effective user agent.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(user_agent)
    }

    /// Connection timeout, if configured.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Watchdog interval, never zero.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }

    /// Sets the proxy URL.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the watchdog interval.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            proxy: None,
            connect_timeout_ms: None,
            watchdog_interval_ms: default_watchdog_interval_ms(),
        }
    }
}
