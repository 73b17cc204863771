//! Pesapal instant payment notification (IPN) types.

use serde::{Deserialize, Serialize};

/// Raw IPN parameters as delivered by the gateway.
///
/// Pesapal sends these as query parameters for GET registrations and as a
/// JSON body for POST registrations. Any of them may be missing on a
/// malformed delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpnQuery {
    #[serde(rename = "OrderTrackingId", default)]
    pub order_tracking_id: Option<String>,
    #[serde(rename = "OrderMerchantReference", default)]
    pub order_merchant_reference: Option<String>,
    #[serde(rename = "OrderNotificationType", default)]
    pub order_notification_type: Option<String>,
}

impl IpnQuery {
    /// Returns the notification if every parameter is present and non-blank.
    pub fn into_notification(self) -> Option<IpnNotification> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        Some(IpnNotification {
            tracking_id: present(self.order_tracking_id)?,
            merchant_reference: present(self.order_merchant_reference)?,
            notification_type: present(self.order_notification_type)?,
        })
    }
}

/// A complete IPN delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpnNotification {
    pub tracking_id: String,
    pub merchant_reference: String,
    pub notification_type: String,
}

/// Acknowledgement body the gateway expects in reply to an IPN.
///
/// The HTTP status is always 200; `status` tells the gateway whether the
/// notification was usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpnAck {
    pub order_notification_type: String,
    pub order_tracking_id: String,
    pub order_merchant_reference: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IpnAck {
    const UNKNOWN: &'static str = "UNKNOWN";

    /// Acknowledge a complete notification.
    pub fn received(notification: &IpnNotification) -> Self {
        Self {
            order_notification_type: notification.notification_type.clone(),
            order_tracking_id: notification.tracking_id.clone(),
            order_merchant_reference: notification.merchant_reference.clone(),
            status: 200,
            message: None,
        }
    }

    /// Acknowledge receipt of a notification that is missing parameters.
    pub fn incomplete(query: &IpnQuery) -> Self {
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| Self::UNKNOWN.to_string());
        Self {
            order_notification_type: or_unknown(&query.order_notification_type),
            order_tracking_id: or_unknown(&query.order_tracking_id),
            order_merchant_reference: or_unknown(&query.order_merchant_reference),
            status: 500,
            message: Some("IPN received but missing required parameters.".to_string()),
        }
    }
}
