//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::core::TrackerError;
use crate::core::constants::{ERROR_LOG_CAPACITY, REQUEST_TIMEOUT, STATE_POLL_INTERVAL};
use crate::transport::BackoffConfig;

/// Environment variable holding the event base URL.
pub const ENV_BASE_URL: &str = "TRACKERS_BASE_URL";
/// Environment variable holding the client build fingerprint.
pub const ENV_CLIENT_HASH: &str = "TRACKERS_CLIENT_HASH";
/// Environment variable overriding the snapshot storage key.
pub const ENV_STORAGE_KEY: &str = "TRACKERS_STORAGE_KEY";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Event base URL, e.g. `https://host/tour-2024`.
    pub base_url: Url,

    /// Fingerprint of this client build; compared with the server's.
    pub client_hash: Option<String>,

    /// Snapshot storage key; defaults to the base URL path.
    pub storage_key: Option<String>,

    /// Reconnect timing.
    pub backoff: BackoffConfig,

    /// Delay before asking for state again while the server is loading.
    pub state_poll_interval: Duration,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Errors kept in the rolling error log.
    pub error_log_capacity: usize,
}

impl ClientConfig {
    /// Defaults for the event at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client_hash: None,
            storage_key: None,
            backoff: BackoffConfig::default(),
            state_poll_interval: STATE_POLL_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
            error_log_capacity: ERROR_LOG_CAPACITY,
        }
    }

    /// Start a builder.
    pub fn builder(base_url: Url) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Read `TRACKERS_BASE_URL`, `TRACKERS_CLIENT_HASH` and
    /// `TRACKERS_STORAGE_KEY`.
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TrackerError> {
        let raw = lookup(ENV_BASE_URL)
            .ok_or_else(|| TrackerError::Config(format!("{ENV_BASE_URL} is not set")))?;
        let base_url = Url::parse(&raw)
            .map_err(|e| TrackerError::Config(format!("{ENV_BASE_URL}: {e}")))?;
        let mut config = Self::new(base_url);
        config.client_hash = lookup(ENV_CLIENT_HASH).filter(|s| !s.is_empty());
        config.storage_key = lookup(ENV_STORAGE_KEY).filter(|s| !s.is_empty());
        Ok(config)
    }

    /// Key the session snapshot is stored under.
    pub fn storage_key(&self) -> String {
        self.storage_key
            .clone()
            .unwrap_or_else(|| self.base_url.path().to_string())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with defaults.
    pub fn new(base_url: Url) -> Self {
        Self {
            config: ClientConfig::new(base_url),
        }
    }

    /// Set the client build fingerprint.
    pub fn client_hash(mut self, hash: impl Into<String>) -> Self {
        self.config.client_hash = Some(hash.into());
        self
    }

    /// Set the snapshot storage key.
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.storage_key = Some(key.into());
        self
    }

    /// Set reconnect timing.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the state re-poll interval.
    pub fn state_poll_interval(mut self, interval: Duration) -> Self {
        self.config.state_poll_interval = interval;
        self
    }

    /// Set the HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the error log capacity (at least 1).
    pub fn error_log_capacity(mut self, capacity: usize) -> Self {
        self.config.error_log_capacity = capacity.max(1);
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> Url {
        Url::parse("https://trackers.example.net/tour-2024").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new(base());
        assert_eq!(config.state_poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.error_log_capacity, 20);
        assert_eq!(config.backoff.ceiling, Duration::from_secs(20));
        assert_eq!(config.storage_key(), "/tour-2024");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder(base())
            .client_hash("abc")
            .storage_key("custom")
            .state_poll_interval(Duration::from_secs(1))
            .error_log_capacity(0)
            .build();
        assert_eq!(config.client_hash.as_deref(), Some("abc"));
        assert_eq!(config.storage_key(), "custom");
        assert_eq!(config.state_poll_interval, Duration::from_secs(1));
        assert_eq!(config.error_log_capacity, 1);
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://localhost:8080/events/x"),
            (ENV_CLIENT_HASH, "deadbeef"),
            (ENV_STORAGE_KEY, ""),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/events/x");
        assert_eq!(config.client_hash.as_deref(), Some("deadbeef"));
        assert!(config.storage_key.is_none());
    }

    #[test]
    fn test_from_lookup_errors() {
        assert!(matches!(
            ClientConfig::from_lookup(|_| None),
            Err(TrackerError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(|_| Some("not a url".to_string())),
            Err(TrackerError::Config(_))
        ));
    }
}
