//! Request and response bodies of the Pesapal v3 API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::GatewayPayload;
use super::lenient;
use crate::objects::DeliveryAddress;

/// The `error` object Pesapal embeds in responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    /// Whether this object describes an actual failure.
    pub fn is_rejection(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pesapal error {}: {}",
            self.code.as_deref().unwrap_or("-"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "expiryDate")]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

impl GatewayPayload for TokenResponse {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

/// A bearer token for the Pesapal API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expiry_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Billing address as Pesapal requires it: every field present, blank when
/// unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAddress {
    pub email_address: String,
    pub phone_number: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub line_1: String,
    pub line_2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub zip_code: String,
    pub country_code: String,
}

impl From<&DeliveryAddress> for BillingAddress {
    fn from(address: &DeliveryAddress) -> Self {
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            email_address: field(&address.email_address),
            phone_number: field(&address.phone_number),
            first_name: field(&address.first_name),
            middle_name: field(&address.middle_name),
            last_name: field(&address.last_name),
            line_1: field(&address.line_1),
            line_2: field(&address.line_2),
            city: field(&address.city),
            state: field(&address.state),
            postal_code: field(&address.postal_code),
            zip_code: field(&address.zip_code),
            country_code: field(&address.country_code),
        }
    }
}

/// Body of `POST /Transactions/SubmitOrderRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    /// Merchant reference of the payment.
    pub id: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub description: String,
    pub callback_url: String,
    pub notification_id: String,
    pub billing_address: BillingAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    #[serde(default)]
    pub order_tracking_id: Option<String>,
    #[serde(default)]
    pub merchant_reference: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
}

impl GatewayPayload for SubmitOrderResponse {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

/// Response of `GET /Transactions/GetTransactionStatus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub confirmation_code: Option<String>,
    #[serde(default)]
    pub payment_status_description: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub payment_account: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub merchant_reference: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
}

impl GatewayPayload for TransactionStatus {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Administrative operations
// ---------------------------------------------------------------------------

/// Body of `POST /Transactions/RefundRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub confirmation_code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub username: String,
    pub remarks: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResponse {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

impl GatewayPayload for RefundResponse {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

/// Body of `POST /Transactions/CancelOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub order_tracking_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

impl GatewayPayload for CancelOrderResponse {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

/// How Pesapal delivers notifications to a registered IPN URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IpnNotificationKind {
    Get,
    Post,
}

/// Body of `POST /URLSetup/RegisterIPN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterIpnRequest {
    pub url: String,
    pub ipn_notification_type: IpnNotificationKind,
}

/// A registered IPN endpoint, as returned by registration and listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpnRegistration {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub ipn_id: Option<String>,
    #[serde(default)]
    pub ipn_notification_type_description: Option<String>,
    #[serde(default)]
    pub ipn_status_description: Option<String>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
}

impl GatewayPayload for IpnRegistration {
    fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }
}

/// `GET /URLSetup/GetIpnList` answers with a bare array on success and an
/// error envelope on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum IpnListResponse {
    List(Vec<IpnRegistration>),
    Failure {
        #[serde(default)]
        error: Option<ApiError>,
    },
}

impl GatewayPayload for IpnListResponse {
    fn api_error(&self) -> Option<&ApiError> {
        match self {
            IpnListResponse::List(_) => None,
            IpnListResponse::Failure { error } => error.as_ref(),
        }
    }
}
