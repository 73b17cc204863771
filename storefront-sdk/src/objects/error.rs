//! Error body shared by every storefront payment endpoint.

use serde::{Deserialize, Serialize};

use super::PaymentStatus;

/// JSON body returned with every non-2xx payment response.
///
/// `message` is always human readable. The remaining fields are only present
/// when they carry information the checkout page can still display, for
/// example the gateway's own error code or the status of a payment whose
/// local record went missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pesapal_error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(
        default,
        rename = "confirmationCode",
        skip_serializing_if = "Option::is_none"
    )]
    pub confirmation_code: Option<String>,
    #[serde(
        default,
        rename = "statusDescription",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_description: Option<String>,
}

impl ErrorBody {
    /// An error body carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}
