//! Client configuration.
//!
//! Configuration is fixed at construction time and validated once, in
//! [`ClientConfigBuilder::build`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use realtime_link::ClientConfig;
//!
//! # fn example() -> realtime_link::Result<()> {
//! let config = ClientConfig::builder()
//!     .endpoint("https://api.example.com/live")
//!     .max_attempts(3)
//!     .base_delay(Duration::from_secs(1))
//!     .max_delay(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `reconnection` | `true` |
//! | `max_attempts` | 5 |
//! | `base_delay` | 1 s |
//! | `max_delay` | 30 s |
//! | `negotiation_timeout` | 10 s |
//! | `transports` | WebSocket (0), long-polling (1) |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashSet;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{TransportCandidate, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Default number of reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for reconnect delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default time allowed for one transport to open.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client configuration.
///
/// Use [`ClientConfig::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: Url,
    reconnection: bool,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    negotiation_timeout: Duration,
    /// Sorted by priority.
    transports: Vec<TransportCandidate>,
}

impl ClientConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the server base address.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns `true` if dropped connections are retried automatically.
    #[inline]
    #[must_use]
    pub fn reconnection(&self) -> bool {
        self.reconnection
    }

    /// Returns the number of reconnect attempts before giving up.
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first reconnect attempt.
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the ceiling for reconnect delays, before jitter.
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the time allowed for one transport candidate to open.
    #[inline]
    #[must_use]
    pub fn negotiation_timeout(&self) -> Duration {
        self.negotiation_timeout
    }

    /// Returns the transport candidates in the order they are tried.
    #[inline]
    #[must_use]
    pub fn transports(&self) -> &[TransportCandidate] {
        &self.transports
    }
}

// ============================================================================
// ClientConfigBuilder
// ============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    reconnection: bool,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    negotiation_timeout: Duration,
    transports: Vec<TransportCandidate>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            reconnection: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            transports: TransportCandidate::defaults(),
        }
    }
}

impl ClientConfigBuilder {
    /// Creates a builder with default settings and no endpoint.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server base address (`http`, `https`, `ws` or `wss`).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn reconnection(mut self, enabled: bool) -> Self {
        self.reconnection = enabled;
        self
    }

    /// Sets the number of reconnect attempts before giving up.
    #[inline]
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay before the first reconnect attempt.
    #[inline]
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the ceiling for reconnect delays.
    #[inline]
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the time allowed for one transport candidate to open.
    #[inline]
    #[must_use]
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Replaces the transport candidates.
    #[inline]
    #[must_use]
    pub fn transports(mut self, candidates: impl IntoIterator<Item = TransportCandidate>) -> Self {
        self.transports = candidates.into_iter().collect();
        self
    }

    /// Restricts negotiation to a single transport.
    #[inline]
    #[must_use]
    pub fn only_transport(self, kind: TransportKind) -> Self {
        self.transports([TransportCandidate::new(kind, 0)])
    }

    /// Validates the settings and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if:
    /// - No endpoint was set, or it does not parse, or its scheme is not
    ///   `http`, `https`, `ws` or `wss`
    /// - `base_delay` is zero or `max_delay` is below it
    /// - `negotiation_timeout` is zero
    /// - No transport candidate is given, or a kind appears twice
    pub fn build(self) -> Result<ClientConfig> {
        let endpoint = self.validate_endpoint()?;
        self.validate_delays()?;
        let transports = self.validate_transports()?;

        Ok(ClientConfig {
            endpoint,
            reconnection: self.reconnection,
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            negotiation_timeout: self.negotiation_timeout,
            transports,
        })
    }

    /// Parses the endpoint and checks its scheme.
    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::config("Endpoint is required. Use .endpoint() to set it."))?;

        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("Invalid endpoint '{raw}': {e}")))?;

        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Unsupported endpoint scheme '{other}'"
            ))),
        }
    }

    /// Checks backoff and timeout durations.
    fn validate_delays(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::config("base_delay must be greater than zero"));
        }

        if self.max_delay < self.base_delay {
            return Err(Error::config(format!(
                "max_delay ({:?}) must not be below base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }

        if self.negotiation_timeout.is_zero() {
            return Err(Error::config(
                "negotiation_timeout must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Checks the candidates and sorts them by priority.
    fn validate_transports(&self) -> Result<Vec<TransportCandidate>> {
        if self.transports.is_empty() {
            return Err(Error::config("At least one transport candidate is required"));
        }

        let mut seen = FxHashSet::default();
        for candidate in &self.transports {
            if !seen.insert(candidate.kind) {
                return Err(Error::config(format!(
                    "Transport {} listed more than once",
                    candidate.kind
                )));
            }
        }

        let mut sorted = self.transports.clone();
        sorted.sort_by_key(|c| c.priority);
        Ok(sorted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ClientConfigBuilder {
        ClientConfig::builder().endpoint("http://localhost:4000")
    }

    #[test]
    fn test_defaults() {
        let config = builder().build().expect("valid config");

        assert!(config.reconnection());
        assert_eq!(config.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.base_delay(), DEFAULT_BASE_DELAY);
        assert_eq!(config.max_delay(), DEFAULT_MAX_DELAY);
        assert_eq!(config.negotiation_timeout(), DEFAULT_NEGOTIATION_TIMEOUT);
        assert_eq!(config.transports(), TransportCandidate::defaults().as_slice());
    }

    #[test]
    fn test_build_fails_without_endpoint() {
        let result = ClientConfig::builder().build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_unparseable_endpoint() {
        let result = ClientConfig::builder().endpoint("not a url").build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_unsupported_scheme() {
        let result = ClientConfig::builder().endpoint("ftp://example.com").build();
        let Err(Error::Config { message }) = result else {
            panic!("expected config error");
        };
        assert!(message.contains("ftp"));
    }

    #[test]
    fn test_build_fails_with_zero_base_delay() {
        let result = builder().base_delay(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_when_max_below_base() {
        let result = builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_zero_negotiation_timeout() {
        let result = builder().negotiation_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_without_transports() {
        let result = builder().transports(Vec::new()).build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_duplicate_kind() {
        let result = builder()
            .transports([
                TransportCandidate::new(TransportKind::WebSocket, 0),
                TransportCandidate::new(TransportKind::WebSocket, 1),
            ])
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_transports_sorted_by_priority() {
        let config = builder()
            .transports([
                TransportCandidate::new(TransportKind::LongPolling, 5),
                TransportCandidate::new(TransportKind::WebSocket, 2),
            ])
            .build()
            .expect("valid config");

        let kinds: Vec<_> = config.transports().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![TransportKind::WebSocket, TransportKind::LongPolling]);
    }

    #[test]
    fn test_only_transport() {
        let config = builder()
            .only_transport(TransportKind::LongPolling)
            .build()
            .expect("valid config");
        assert_eq!(config.transports().len(), 1);
        assert_eq!(config.transports()[0].kind, TransportKind::LongPolling);
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = builder().max_attempts(3);
        let cloned = builder.clone();
        assert_eq!(cloned.max_attempts, 3);
    }
}
