//! Rate limit configuration.

use std::time::Duration;

/// Fixed-window limits for the public payment endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window: Duration,
    /// Verify requests allowed per caller per window.
    pub verify_max: u32,
    /// IPN deliveries allowed per caller per window.
    pub ipn_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_secs(60),
            verify_max: 30,
            ipn_max: 60,
        }
    }
}
