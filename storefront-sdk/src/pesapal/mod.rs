//! Pesapal v3 gateway contract.
//!
//! Every Pesapal endpoint answers HTTP 200 for business failures and puts
//! the failure in an `error` object next to the regular fields. The client
//! turns that shape into [`GatewayReply::Rejected`] so business rejections
//! are values, while transport failures stay errors.

#[cfg(feature = "client")]
mod client;
mod lenient;
pub mod wire;

#[cfg(feature = "client")]
pub use client::{GatewayError, PesapalClient};
pub use wire::{
    AccessToken, ApiError, BillingAddress, CancelOrderRequest, CancelOrderResponse,
    IpnNotificationKind, IpnRegistration, RefundRequest, RefundResponse, RegisterIpnRequest,
    SubmitOrderRequest, SubmitOrderResponse, TransactionStatus,
};

/// Outcome of a gateway call that reached Pesapal and got a decodable answer.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply<T> {
    /// The gateway accepted the request.
    Accepted(T),
    /// The gateway answered with an `error` object carrying a code.
    Rejected(ApiError),
}

impl<T> GatewayReply<T> {
    /// Map the accepted payload, keeping a rejection as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> GatewayReply<U> {
        match self {
            GatewayReply::Accepted(value) => GatewayReply::Accepted(f(value)),
            GatewayReply::Rejected(error) => GatewayReply::Rejected(error),
        }
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            GatewayReply::Accepted(value) => Some(value),
            GatewayReply::Rejected(_) => None,
        }
    }
}

/// Responses that may carry a Pesapal `error` object.
pub trait GatewayPayload {
    fn api_error(&self) -> Option<&ApiError>;

    /// Split a decoded response into an accepted payload or a rejection.
    ///
    /// Pesapal fills `error` with nulls on success, so only an error with a
    /// non-blank code counts as a rejection.
    fn into_reply(self) -> GatewayReply<Self>
    where
        Self: Sized,
    {
        match self.api_error().filter(|e| e.is_rejection()).cloned() {
            Some(error) => GatewayReply::Rejected(error),
            None => GatewayReply::Accepted(self),
        }
    }
}
