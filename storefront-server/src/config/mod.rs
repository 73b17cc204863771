//! Configuration module for storefront-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{FileConfig, IdempotencyBackend as FileIdempotencyBackend};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use storefront_core::config::{
    CheckoutConfig, IdempotencyBackend, IdempotencyConfig, PesapalConfig, RateLimitConfig,
    SharedConfig,
};
use thiserror::Error;

const CONSUMER_KEY_ENV: &str = "PESAPAL_CONSUMER_KEY";
const CONSUMER_SECRET_ENV: &str = "PESAPAL_CONSUMER_SECRET";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Server section after overrides.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub checkout: CheckoutConfig,
    pub pesapal: PesapalConfig,
    pub idempotency: IdempotencyConfig,
    pub rate_limit: RateLimitConfig,
}

impl LoadedConfig {
    /// The sections that can be swapped on SIGHUP.
    pub fn shared(&self) -> SharedConfig {
        SharedConfig::new(self.checkout.clone(), self.rate_limit)
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI and environment overrides
    /// 3. Validate the configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        apply_env_credentials(&mut file_config, |name| std::env::var(name).ok());

        validate(&file_config)?;
        let loaded = build_loaded_config(file_config);

        if loaded.checkout.default_ipn_id().is_none() {
            tracing::warn!("No IPN id configured; payment initiation will fail");
        }
        if loaded.checkout.app_base_url.is_none() {
            tracing::warn!("No app_base_url configured; payment initiation will fail");
        }
        Ok(loaded)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

/// Fill empty credentials from the environment.
fn apply_env_credentials(config: &mut FileConfig, lookup: impl Fn(&str) -> Option<String>) {
    if config.pesapal.consumer_key.is_empty() {
        if let Some(key) = lookup(CONSUMER_KEY_ENV) {
            config.pesapal.consumer_key = key;
        }
    }
    if config.pesapal.consumer_secret.is_empty() {
        if let Some(secret) = lookup(CONSUMER_SECRET_ENV) {
            config.pesapal.consumer_secret = secret;
        }
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if !matches!(config.pesapal.base_url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "pesapal.base_url must be http or https, got {}",
            config.pesapal.base_url
        )));
    }
    if config.pesapal.consumer_key.trim().is_empty()
        || config.pesapal.consumer_secret.trim().is_empty()
    {
        return Err(ConfigError::ValidationError(format!(
            "pesapal credentials missing; set them in the file or via {CONSUMER_KEY_ENV} and {CONSUMER_SECRET_ENV}"
        )));
    }
    if let Some(base) = &config.checkout.app_base_url {
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "checkout.app_base_url must be http or https, got {base}"
            )));
        }
    }
    let positive = [
        ("pesapal.timeout_secs", config.pesapal.timeout_secs),
        ("idempotency.ttl_secs", config.idempotency.ttl_secs),
        (
            "idempotency.sweep_interval_secs",
            config.idempotency.sweep_interval_secs,
        ),
        ("rate_limit.window_secs", config.rate_limit.window_secs),
    ];
    if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        checkout: CheckoutConfig {
            app_base_url: file_config.checkout.app_base_url,
            ipn_ids: file_config.checkout.ipn_ids,
        },
        pesapal: PesapalConfig {
            base_url: file_config.pesapal.base_url,
            consumer_key: file_config.pesapal.consumer_key,
            consumer_secret: file_config.pesapal.consumer_secret,
            timeout: Duration::from_secs(file_config.pesapal.timeout_secs),
        },
        idempotency: IdempotencyConfig {
            backend: match file_config.idempotency.backend {
                FileIdempotencyBackend::Memory => IdempotencyBackend::Memory,
                FileIdempotencyBackend::Postgres => IdempotencyBackend::Postgres,
            },
            ttl: Duration::from_secs(file_config.idempotency.ttl_secs),
            sweep_interval: Duration::from_secs(file_config.idempotency.sweep_interval_secs),
        },
        rate_limit: RateLimitConfig {
            enabled: file_config.rate_limit.enabled,
            window: Duration::from_secs(file_config.rate_limit.window_secs),
            verify_max: file_config.rate_limit.verify_max,
            ipn_max: file_config.rate_limit.ipn_max,
        },
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
