//! Server configuration
//!
//! Sources are merged in this order, later ones winning:
//! 1. [`ServerConfig::default()`]
//! 2. a TOML file (`weave.toml` in the working directory, or an explicit path)
//! 3. environment variables prefixed `WEAVE_`, e.g. `WEAVE_PORT=8080`

use crate::error::{Result, WeaveError};
use crate::router::DEFAULT_BODY_LIMIT;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILENAME: &str = "weave.toml";
pub const DEFAULT_ENV_PREFIX: &str = "WEAVE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest request body read, in bytes.
    pub body_limit: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            body_limit: DEFAULT_BODY_LIMIT,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load from `weave.toml` (if present) and `WEAVE_*` variables.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Read this file instead of `weave.toml`. A missing file is skipped.
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<ServerConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(ServerConfig::default()));

        let path = self
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Toml::file(&path));
        } else if self.config_path.is_some() {
            tracing::warn!(path = %path.display(), "Configuration file not found, skipping");
        }

        figment = figment.merge(Env::prefixed(&self.env_prefix));

        let config: ServerConfig = figment.extract().map_err(|err| {
            WeaveError::configuration(format!("Failed to load configuration: {}", err))
        })?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &ServerConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        return Err(WeaveError::configuration("host must not be empty"));
    }
    if config.body_limit == 0 {
        return Err(WeaveError::configuration("body_limit must be greater than zero"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new().load().map_err(|e| e.to_string())?;
            assert_eq!(config, ServerConfig::default());
            assert_eq!(config.addr(), "0.0.0.0:3000");
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "weave.toml",
                r#"
                    host = "127.0.0.1"
                    port = 8080
                "#,
            )?;
            jail.set_env("WEAVE_PORT", "9090");
            jail.set_env("WEAVE_SHUTDOWN_TIMEOUT_SECS", "5");

            let config = ServerConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9090);
            assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        Jail::expect_with(|jail| {
            jail.set_env("WEAVE_BODY_LIMIT", "0");
            let err = ConfigLoader::new().load().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

            jail.set_env("WEAVE_BODY_LIMIT", "1024");
            jail.set_env("WEAVE_PORT", "not-a-port");
            assert!(ConfigLoader::new().load().is_err());
            Ok(())
        });
    }
}
