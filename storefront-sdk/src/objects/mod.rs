pub mod error;
pub mod ipn;
pub mod payment;

pub use error::ErrorBody;
pub use ipn::{IpnAck, IpnNotification, IpnQuery};
pub use payment::{
    CartItem, DeliveryAddress, InitiatePaymentRequest, InitiatePaymentResponse, OrderDetails,
    PaymentStatus, VerifyPaymentRequest, VerifyPaymentResponse,
};
