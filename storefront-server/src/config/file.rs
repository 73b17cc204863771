//! TOML file configuration structures.
//!
//! These structs directly map to the `storefront-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    pub pesapal: PesapalConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Checkout section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Public storefront URL used to build the payment callback URL.
    #[serde(default)]
    pub app_base_url: Option<Url>,
    /// Registered IPN ids; the first non-blank one is used.
    #[serde(default)]
    pub ipn_ids: Vec<String>,
}

/// Pesapal section.
///
/// Credentials left empty here are read from `PESAPAL_CONSUMER_KEY` and
/// `PESAPAL_CONSUMER_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PesapalConfig {
    pub base_url: Url,
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyBackend {
    #[default]
    Memory,
    Postgres,
}

/// Idempotency ledger section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default)]
    pub backend: IdempotencyBackend,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            backend: IdempotencyBackend::default(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Rate limit section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_verify_max")]
    pub verify_max: u32,
    #[serde(default = "default_ipn_max")]
    pub ipn_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: default_window_secs(),
            verify_max: default_verify_max(),
            ipn_max: default_ipn_max(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_verify_max() -> u32 {
    30
}

fn default_ipn_max() -> u32 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[checkout]
app_base_url = "https://shop.example.com"
ipn_ids = ["", "ipn-123"]

[pesapal]
base_url = "https://cybqa.pesapal.com/pesapalv3/api"
consumer_key = "key"
consumer_secret = "secret"
timeout_secs = 10

[idempotency]
backend = "postgres"
ttl_secs = 600

[rate_limit]
enabled = true
verify_max = 5
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.checkout.ipn_ids.len(), 2);
        assert_eq!(config.pesapal.timeout_secs, 10);
        assert_eq!(config.idempotency.backend, IdempotencyBackend::Postgres);
        assert_eq!(config.idempotency.sweep_interval_secs, 60);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.verify_max, 5);
        assert_eq!(config.rate_limit.ipn_max, 60);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[pesapal]
base_url = "https://pay.pesapal.com/v3/api"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert!(config.checkout.app_base_url.is_none());
        assert!(config.pesapal.consumer_key.is_empty());
        assert_eq!(config.pesapal.timeout_secs, 30);
        assert_eq!(config.idempotency.backend, IdempotencyBackend::Memory);
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn test_missing_pesapal_section_is_rejected() {
        assert!(toml::from_str::<FileConfig>("[server]\n").is_err());
    }
}
