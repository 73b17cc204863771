//! Pesapal credentials and transport settings.

use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesapalConfig {
    /// API root, e.g. `https://cybqa.pesapal.com/pesapalv3/api`.
    pub base_url: Url,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Timeout applied to every gateway request.
    pub timeout: Duration,
}

/// Where the idempotency ledger keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdempotencyBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub backend: IdempotencyBackend,
    pub ttl: Duration,
    /// How often expired entries are purged.
    pub sweep_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            backend: IdempotencyBackend::Memory,
            ttl: crate::idempotency::DEFAULT_LEDGER_TTL,
            sweep_interval: Duration::from_secs(60),
        }
    }
}
