//! Relay configuration, read from `INKBRIDGE_*` environment variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

const ENV_PREFIX: &str = "INKBRIDGE_";

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret required on `join`. Joins are open when unset.
    pub token: Option<String>,

    /// Capacity of each room's broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// `tracing` filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Load from the environment, after reading `.env` if present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        match envy::prefixed(ENV_PREFIX).from_env::<ServerConfig>() {
            Ok(config) => {
                config.validate()?;
                info!("Configuration loaded");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::Env(e))
            }
        }
    }

    /// Load from explicit key/value pairs (keys carry the `INKBRIDGE_` prefix).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: ServerConfig = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be positive".to_string()));
        }
        if self.token.as_deref() == Some("") {
            return Err(ConfigError::Invalid("token must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
            channel_capacity: default_channel_capacity(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_channel_capacity() -> usize {
    256
}

fn default_log_filter() -> String {
    "inkbridge_server=info,tower_http=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.server_address(), "0.0.0.0:3030");
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = ServerConfig::from_vars(vars(&[
            ("INKBRIDGE_PORT", "1235"),
            ("INKBRIDGE_TOKEN", "super-secret-token"),
            ("UNRELATED_PORT", "1"),
        ]))
        .unwrap();
        assert_eq!(config.port, 1235);
        assert_eq!(config.token.as_deref(), Some("super-secret-token"));
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let result = ServerConfig::from_vars(vars(&[("INKBRIDGE_PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = ServerConfig::from_vars(vars(&[("INKBRIDGE_CHANNEL_CAPACITY", "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
