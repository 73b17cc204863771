//! Application state shared across all request handlers.

use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use storefront_core::config::SharedConfig;
use storefront_core::events::IpnReceivedSender;
use storefront_core::services::PaymentService;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    /// Reloadable configuration sections (updated on SIGHUP).
    pub config: SharedConfig,
    /// Hands acknowledged IPNs to the `IpnProcessor`.
    pub ipn_tx: IpnReceivedSender,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        payments: Arc<PaymentService>,
        config: SharedConfig,
        ipn_tx: IpnReceivedSender,
    ) -> Self {
        Self {
            payments,
            config,
            ipn_tx,
            rate_limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Apply the configured limit for `label` to `client`.
    ///
    /// Always allows the request while rate limiting is disabled.
    pub async fn allow(&self, label: RateLimited, client: &str) -> bool {
        let config = *self.config.rate_limit.read().await;
        if !config.enabled {
            return true;
        }
        let max = match label {
            RateLimited::Verify => config.verify_max,
            RateLimited::Ipn => config.ipn_max,
        };
        let key = format!("{}:{}", label.as_str(), client);
        self.rate_limiter.check(&key, max, config.window).await
    }
}

/// Endpoints guarded by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimited {
    Verify,
    Ipn,
}

impl RateLimited {
    fn as_str(self) -> &'static str {
        match self {
            RateLimited::Verify => "verify",
            RateLimited::Ipn => "ipn",
        }
    }
}
