//! Connection and container configuration.
//!
//! Both configs have sensible defaults, a builder, `validate()`, and can be
//! loaded from `RABBIT_*` environment variables.
//!
//! | Variable                          | Default     |
//! |-----------------------------------|-------------|
//! | `RABBIT_HOST`                     | `localhost` |
//! | `RABBIT_PORT`                     | `5672`      |
//! | `RABBIT_USERNAME`                 | `guest`     |
//! | `RABBIT_PASSWORD`                 | `guest`     |
//! | `RABBIT_VHOST`                    | `/`         |
//! | `RABBIT_HEARTBEAT_SECS`           | `3`         |
//! | `RABBIT_CONNECT_TIMEOUT_MS`       | `1000`      |
//! | `RABBIT_RECONNECT_INTERVAL_MS`    | `500`       |
//! | `RABBIT_REACTIVATION_INTERVAL_MS` | `1000`      |
//! | `RABBIT_PREFETCH_COUNT`           | `5`         |
//!
//! # Example
//!
//! ```no_run
//! use resilient_rabbit_core::config::{ConnectionConfig, ContainerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = ConnectionConfig::from_env()?;
//! let container = ContainerConfig::from_env()?;
//! println!("Connecting to {}", connection.address());
//! # Ok(())
//! # }
//! ```

use crate::consumer::DEFAULT_PREFETCH_COUNT;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(3);
/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default interval between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);
/// Default interval between consumer re-activation rounds
pub const DEFAULT_REACTIVATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Broker login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("guest", "guest")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to reach the broker and how to recover from connection loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Login
    pub credentials: Credentials,
    /// Virtual host
    pub virtual_host: String,
    /// Requested heartbeat interval
    pub heartbeat: Duration,
    /// Upper bound for a single connection attempt
    pub connect_timeout: Duration,
    /// Wait between reconnect attempts after a hard disconnect
    pub reconnect_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            credentials: Credentials::default(),
            virtual_host: "/".to_string(),
            heartbeat: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port`, for logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load from `RABBIT_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, map, secrets store).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value cannot be parsed or the result is invalid.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup("RABBIT_HOST") {
            config.host = host;
        }
        if let Some(port) = parse(&lookup, "RABBIT_PORT")? {
            config.port = port;
        }
        if let Some(username) = lookup("RABBIT_USERNAME") {
            config.credentials.username = username;
        }
        if let Some(password) = lookup("RABBIT_PASSWORD") {
            config.credentials.password = password;
        }
        if let Some(vhost) = lookup("RABBIT_VHOST") {
            config.virtual_host = vhost;
        }
        if let Some(secs) = parse(&lookup, "RABBIT_HEARTBEAT_SECS")? {
            config.heartbeat = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, "RABBIT_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "RABBIT_RECONNECT_INTERVAL_MS")? {
            config.reconnect_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the host is empty, the port is zero,
    /// or the connect timeout or reconnect interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be > 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Validation("connect_timeout must be > 0".to_string()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(ConfigError::Validation("reconnect_interval must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the broker port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the login.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Set the virtual host.
    #[must_use]
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.config.virtual_host = virtual_host.into();
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the interval between reconnect attempts.
    #[must_use]
    pub const fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Build and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the configuration is invalid.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Consumer container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Wait between re-activation rounds after a reconnect
    pub reactivation_interval: Duration,
    /// Prefetch count for consumers added by queue name only
    pub default_prefetch_count: u16,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            reactivation_interval: DEFAULT_REACTIVATION_INTERVAL,
            default_prefetch_count: DEFAULT_PREFETCH_COUNT,
        }
    }
}

impl ContainerConfig {
    /// Set the re-activation interval.
    #[must_use]
    pub const fn with_reactivation_interval(mut self, interval: Duration) -> Self {
        self.reactivation_interval = interval;
        self
    }

    /// Set the default prefetch count.
    #[must_use]
    pub const fn with_default_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.default_prefetch_count = prefetch_count;
        self
    }

    /// Load from `RABBIT_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value cannot be parsed or the result is invalid.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse(&lookup, "RABBIT_REACTIVATION_INTERVAL_MS")? {
            config.reactivation_interval = Duration::from_millis(ms);
        }
        if let Some(prefetch) = parse(&lookup, "RABBIT_PREFETCH_COUNT")? {
            config.default_prefetch_count = prefetch;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the re-activation interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reactivation_interval.is_zero() {
            return Err(ConfigError::Validation(
                "reactivation_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<L, T>(lookup: &L, key: &str) -> Result<Option<T>, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heartbeat, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
        assert_eq!(config.reconnect_interval, Duration::from_millis(500));
        assert_eq!(
            ContainerConfig::default().reactivation_interval,
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("RABBIT_HOST", "rabbit.internal"),
            ("RABBIT_PORT", "5673"),
            ("RABBIT_RECONNECT_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.address(), "rabbit.internal:5673");
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.credentials, Credentials::default());
    }

    #[test]
    fn unparsable_value_is_reported() {
        let err = ConnectionConfig::from_lookup(lookup(&[("RABBIT_PORT", "amqp")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "RABBIT_PORT".to_string(),
                value: "amqp".to_string(),
            }
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(
            ConnectionConfig::builder()
                .reconnect_interval(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            ContainerConfig::from_lookup(lookup(&[("RABBIT_REACTIVATION_INTERVAL_MS", "0")]))
                .is_err()
        );
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("app", "s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
