//! Configuration manager

use std::sync::Arc;
use tokio::sync::RwLock;

use first20_core::{
    models::{BackendConfig, Config},
    storage::{init_config_dir, ConfigStorage},
    Result as CoreResult,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] first20_core::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigManagerError>;

/// Loads, validates and persists `config.json`
pub struct ConfigManager {
    storage: ConfigStorage,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    pub fn new() -> CoreResult<Self> {
        let config_dir = init_config_dir()?;
        let storage = ConfigStorage::new(config_dir);

        // Load or create default config
        let config = storage.load()?;

        Ok(Self {
            storage,
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub async fn get(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn update(&self, config: Config) -> Result<Config> {
        config
            .validate()
            .map_err(|e| ConfigManagerError::Invalid(e.to_string()))?;

        self.storage.save(&config)?;

        {
            let mut current = self.config.write().await;
            *current = config.clone();
        }

        tracing::info!("Configuration updated");
        Ok(config)
    }

    pub async fn set_log_level(&self, level: String) -> Result<Config> {
        let mut config = self.get().await;
        config.log_level = level;
        self.update(config).await
    }

    pub async fn set_tick_millis(&self, tick_millis: u64) -> Result<Config> {
        let mut config = self.get().await;
        config.countdown.tick_millis = tick_millis;
        self.update(config).await
    }

    pub async fn set_backend(&self, url: Option<String>, anon_key: Option<String>) -> Result<Config> {
        let mut config = self.get().await;
        config.backend = BackendConfig { url, anon_key };
        self.update(config).await
    }

    pub async fn reset_to_default(&self) -> Result<Config> {
        self.update(Config::default()).await
    }
}
