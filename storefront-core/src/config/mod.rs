//! Runtime configuration shared by the services and the server.
//!
//! These types are already validated. Loading and parsing the TOML file is
//! handled by the server crate.

mod checkout;
mod config_store;
mod gateway;
mod rate_limit;

pub use checkout::CheckoutConfig;
pub use config_store::ConfigStore;
pub use gateway::{IdempotencyBackend, IdempotencyConfig, PesapalConfig};
pub use rate_limit::RateLimitConfig;

/// Sections that can be reloaded without a restart.
#[derive(Clone, Debug)]
pub struct SharedConfig {
    pub checkout: ConfigStore<CheckoutConfig>,
    pub rate_limit: ConfigStore<RateLimitConfig>,
}

impl SharedConfig {
    pub fn new(checkout: CheckoutConfig, rate_limit: RateLimitConfig) -> Self {
        Self {
            checkout: ConfigStore::new(checkout),
            rate_limit: ConfigStore::new(rate_limit),
        }
    }
}
