//! Application configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    pub log_level: String,
    pub countdown: CountdownConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountdownConfig {
    /// Period between two ticks, one second in normal use
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.countdown.validate()?;
        self.backend.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            log_level: "info".to_string(),
            countdown: CountdownConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl CountdownConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_millis == 0 {
            return Err(Error::Validation(
                "Tick interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_millis)
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self { tick_millis: 1000 }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref url) = self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Validation(
                    "Backend URL must start with http:// or https://".to_string(),
                ));
            }
        }

        if let Some(ref key) = self.anon_key {
            if key.trim().is_empty() {
                return Err(Error::Validation("Backend key cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}
