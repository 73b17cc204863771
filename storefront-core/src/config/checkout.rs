//! Checkout configuration.

use url::Url;

/// Settings used to build gateway order submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Public base URL of the storefront. The gateway redirects customers to
    /// `<base>/payment/callback`.
    pub app_base_url: Option<Url>,
    /// IPN ids registered with Pesapal, in preference order.
    pub ipn_ids: Vec<String>,
}

impl CheckoutConfig {
    /// The first non-blank registered IPN id.
    pub fn default_ipn_id(&self) -> Option<&str> {
        self.ipn_ids
            .iter()
            .map(|id| id.trim())
            .find(|id| !id.is_empty())
    }

    /// `<base>/payment/callback`, if a base URL is configured.
    pub fn callback_url(&self) -> Option<String> {
        self.app_base_url.as_ref().map(|base| {
            format!("{}/payment/callback", base.as_str().trim_end_matches('/'))
        })
    }
}
