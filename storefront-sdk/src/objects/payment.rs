//! Checkout payment request and response types.
//!
//! Field names follow what the storefront frontend already sends and reads,
//! which is why some bodies are camelCase and some snake_case.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single cart line, snapshotted when the payment is initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(rename = "_id", alias = "product_id", alias = "productId")]
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
}

/// Delivery (and billing) details captured at checkout.
///
/// Every field is optional on the way in; the gateway payload fills the
/// missing ones with empty strings. Unknown fields (map pins, notes) are kept
/// so the stored snapshot matches what the customer submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeliveryAddress {
    /// Non-blank email address, if any.
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email_address.as_deref())
    }

    /// Non-blank phone number, if any.
    pub fn phone(&self) -> Option<&str> {
        non_blank(self.phone_number.as_deref())
    }

    /// Whether the customer can be reached by email or phone.
    pub fn has_contact(&self) -> bool {
        self.email().is_some() || self.phone().is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Request body for `POST /api/payments/initiate`.
///
/// All fields are optional at the type level so that a missing field is
/// reported by payment validation with a specific message instead of a
/// generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub billing_address: Option<DeliveryAddress>,
    #[serde(default)]
    pub items: Option<Vec<CartItem>>,
}

/// Response of a successful payment initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    /// Hosted payment page the customer is sent to.
    pub redirect_url: String,
    pub merchant_reference: String,
}

/// Request body for `POST /api/payments/verify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub order_tracking_id: Option<String>,
}

/// Order summary rebuilt from the payment's stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(rename = "merchantReference")]
    pub merchant_reference: String,
    #[serde(rename = "totalAmount", with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub currency: String,
    pub items: Vec<CartItem>,
    pub delivery_address: DeliveryAddress,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

/// Response of a successful payment verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub status: PaymentStatus,
    pub status_description: Option<String>,
    pub confirmation_code: Option<String>,
    pub order_details: OrderDetails,
}

/// Payment status for API responses.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `storefront-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Invalid,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "PENDING"),
            PaymentStatus::Completed => write!(f, "COMPLETED"),
            PaymentStatus::Failed => write!(f, "FAILED"),
            PaymentStatus::Reversed => write!(f, "REVERSED"),
            PaymentStatus::Invalid => write!(f, "INVALID"),
        }
    }
}
