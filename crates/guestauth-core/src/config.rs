//! Broker configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file and may be overridden by CLI
//! flags in the daemon. All trust-sensitive knobs (store directory, file
//! modes, clock skew) live here so components receive them through an
//! explicit [`crate::context::ServiceContext`] instead of global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default clock-skew allowance for SAML time-window checks, in seconds.
const DEFAULT_CLOCK_SKEW_SECS: u64 = 300;

/// Default ticket lifetime, in seconds.
const DEFAULT_TICKET_TTL_SECS: u64 = 3600;

/// Default idle timeout before a silent connection is dropped, in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default maximum concurrent connections across all listeners.
const DEFAULT_MAX_CONNECTIONS: usize = 100;

fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/guestauth/aliases")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/run/guestauth")
}

fn default_superuser() -> String {
    "root".to_string()
}

const fn default_clock_skew() -> u64 {
    DEFAULT_CLOCK_SKEW_SECS
}

const fn default_ticket_ttl() -> u64 {
    DEFAULT_TICKET_TTL_SECS
}

const fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Directory holding per-user alias files and the global mapping file.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Directory holding the public and per-user listener sockets.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Name of the account that owns the mapping file and store directory.
    ///
    /// Overridable so tests can run the full stack without uid 0.
    #[serde(default = "default_superuser")]
    pub superuser: String,

    /// Clock-skew allowance for SAML `NotBefore`/`NotOnOrAfter` checks.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Lifetime of issued tickets.
    #[serde(default = "default_ticket_ttl")]
    pub ticket_ttl_secs: u64,

    /// Idle timeout on the connection read path.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Maximum concurrent connections across all listeners.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Identity string this host answers to in SAML `Recipient` checks.
    ///
    /// When unset, a `Recipient` attribute is logged but not matched.
    #[serde(default)]
    pub host_identity: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            socket_dir: default_socket_dir(),
            superuser: default_superuser(),
            clock_skew_secs: default_clock_skew(),
            ticket_ttl_secs: default_ticket_ttl(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections: default_max_connections(),
            host_identity: None,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.superuser.is_empty() {
            return Err(ConfigError::Validation(
                "superuser name must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.ticket_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "ticket_ttl_secs must be at least 1".to_string(),
            ));
        }
        // An hour of allowed skew means the clocks are broken, not skewed.
        if self.clock_skew_secs > 3600 {
            return Err(ConfigError::Validation(format!(
                "clock_skew_secs {} exceeds maximum 3600",
                self.clock_skew_secs
            )));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    /// A field failed validation.
    #[error("invalid config: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BrokerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.superuser, "root");
        assert_eq!(config.clock_skew_secs, 300);
    }

    #[test]
    fn parses_minimal_toml() {
        let config = BrokerConfig::from_toml("").unwrap();
        assert_eq!(config.max_connections, 100);
        assert!(config.host_identity.is_none());
    }

    #[test]
    fn parses_full_toml() {
        let config = BrokerConfig::from_toml(
            r#"
store_dir = "/tmp/store"
socket_dir = "/tmp/sock"
superuser = "admin"
clock_skew_secs = 60
ticket_ttl_secs = 120
host_identity = "vm-host-7"
"#,
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/store"));
        assert_eq!(config.superuser, "admin");
        assert_eq!(config.clock_skew_secs, 60);
        assert_eq!(config.host_identity.as_deref(), Some("vm-host-7"));
    }

    #[test]
    fn rejects_excessive_skew() {
        let err = BrokerConfig::from_toml("clock_skew_secs = 7200").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_empty_superuser() {
        let err = BrokerConfig::from_toml(r#"superuser = """#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
