// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration types for sessions, the registry and the status listener.
//!
//! Every type has a [`Default`] carrying the bench's deployment defaults and
//! builder-style `with_*` setters. [`BenchConfig`] groups everything and can
//! be layered from a TOML file and `CAMTEST_` environment variables.
//!
//! Durations are written in milliseconds in configuration files.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use camtest_lib::config::{RegistryConfig, SessionConfig};
//!
//! let session = SessionConfig::default()
//!     .with_credentials("root", "root")
//!     .with_max_retries(5)
//!     .with_command_timeout(Duration::from_secs(3));
//!
//! let registry = RegistryConfig::default()
//!     .with_max_connections(8)
//!     .with_session(session);
//! assert_eq!(registry.max_connections, 8);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix of environment variables recognised by [`BenchConfig::load`].
pub const ENV_PREFIX: &str = "CAMTEST_";

/// Login credentials for device shells.
///
/// The password is carried for completeness but the deployed devices accept
/// any user at the shell prompt; see [`crate::session`] for the login
/// heuristic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name written at the login prompt.
    pub username: String,
    /// Password (currently unused by the login exchange).
    pub password: String,
}

impl Credentials {
    /// Creates a new set of credentials.
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
        Self::new("root", "root")
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

/// Settings for a single device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Remote shell port.
    pub port: u16,
    /// Login credentials.
    pub credentials: Credentials,
    /// Timeout for opening the socket and for each login read.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Default read deadline for command output.
    #[serde(with = "millis")]
    pub command_timeout: Duration,
    /// Connect attempts before giving up (at least 1).
    pub max_retries: u32,
    /// Base delay of the exponential backoff between connect attempts.
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    /// Timeout of the reachability probe on the first attempt.
    #[serde(with = "millis")]
    pub probe_timeout: Duration,
    /// Pause between writing a command and reading its output.
    #[serde(with = "millis")]
    pub command_settle: Duration,
    /// Timeout for the response that follows the username.
    #[serde(with = "millis")]
    pub auth_response_timeout: Duration,
    /// Timeout for flushing the `exit` command on disconnect.
    #[serde(with = "millis")]
    pub exit_drain_timeout: Duration,
    /// Read deadline for keep-alive commands.
    #[serde(with = "millis")]
    pub keep_alive_timeout: Duration,
    /// Prompt delimiter that terminates command output.
    pub prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 23,
            credentials: Credentials::default(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(3),
            command_settle: Duration::from_millis(500),
            auth_response_timeout: Duration::from_secs(5),
            exit_drain_timeout: Duration::from_secs(2),
            keep_alive_timeout: Duration::from_secs(5),
            prompt: "#".to_string(),
        }
    }
}

impl SessionConfig {
    /// Sets the remote shell port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the login credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    /// Sets the connect and login timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default command read deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the number of connect attempts.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the pause between writing a command and reading its output.
    #[must_use]
    pub fn with_command_settle(mut self, settle: Duration) -> Self {
        self.command_settle = settle;
        self
    }

    /// Sets the login response timeout.
    #[must_use]
    pub fn with_auth_response_timeout(mut self, timeout: Duration) -> Self {
        self.auth_response_timeout = timeout;
        self
    }

    /// Sets the prompt delimiter.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Returns the backoff delay to wait before `attempt` (1-based).
    ///
    /// The first attempt starts immediately; attempt `n >= 2` waits
    /// `retry_delay * 2^(n-2)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.retry_delay.saturating_mul(1 << exponent)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries",
                message: "must be at least 1".to_string(),
            });
        }
        if self.prompt.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "prompt",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Upper bound on sessions, counting connections still being established.
    pub max_connections: usize,
    /// Period of the health-check sweep.
    #[serde(with = "millis")]
    pub health_check_interval: Duration,
    /// Consecutive errors above which a connected session is recycled.
    pub error_threshold: u32,
    /// Settings applied to every session the registry creates.
    pub session: SessionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            health_check_interval: Duration::from_secs(60),
            error_threshold: 5,
            session: SessionConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Sets the session bound.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the health-check period.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the error threshold for forced reconnects.
    #[must_use]
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    /// Sets the per-session settings.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections",
                message: "must be at least 1".to_string(),
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "health_check_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        self.session.validate()
    }
}

/// Settings for the fixture status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Fixture controller host.
    pub host: String,
    /// Fixture controller port.
    pub port: u16,
    /// Idle receive window; elapsing it is not a connection loss.
    #[serde(with = "millis")]
    pub receive_timeout: Duration,
    /// Timeout for opening the connection.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Case-insensitive substring that signals readiness.
    pub ready_marker: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            receive_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            ready_marker: "I am ready".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Creates a configuration for the given fixture address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the idle receive window.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the delay between reconnect attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the reconnect attempt budget.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the ready marker.
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    /// Returns the `host:port` target.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ready_marker.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ready_marker",
                message: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Complete configuration of the bench core.
///
/// # Examples
///
/// ```
/// use camtest_lib::config::BenchConfig;
///
/// let config = BenchConfig::from_toml_str(r#"
///     [registry]
///     max_connections = 4
///
///     [registry.session.credentials]
///     username = "admin"
///     password = "admin"
///
///     [listener]
///     port = 9000
///     reconnect_delay = 250
/// "#).unwrap();
///
/// assert_eq!(config.registry.max_connections, 4);
/// assert_eq!(config.registry.session.credentials.username, "admin");
/// assert_eq!(config.listener.port, 9000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Device registry and session settings.
    pub registry: RegistryConfig,
    /// Fixture status stream settings.
    pub listener: ListenerConfig,
}

impl BenchConfig {
    /// Loads defaults, then `path` if it exists, then `CAMTEST_` variables.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `CAMTEST_REGISTRY__SESSION__CREDENTIALS__USERNAME`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Self::defaults()
            .merge(Toml::file(path.as_ref()))
            .merge(Self::env());
        Self::extract(&figment)
    }

    /// Loads defaults overridden by `CAMTEST_` variables only.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(&Self::defaults().merge(Self::env()))
    }

    /// Parses a TOML document layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a value is invalid.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(&Self::defaults().merge(Toml::string(toml)))
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;
        self.listener.validate()
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
