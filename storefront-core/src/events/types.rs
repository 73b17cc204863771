//! Event types.

use storefront_sdk::objects::IpnNotification;

/// A complete IPN delivery, acknowledged to the gateway and queued for
/// processing.
#[derive(Debug, Clone)]
pub struct IpnReceived {
    pub notification: IpnNotification,
    /// Id of the HTTP request that delivered the notification.
    pub request_id: String,
}
