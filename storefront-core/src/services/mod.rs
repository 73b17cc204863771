//! Payment lifecycle services.
//!
//! - [`PaymentService`]: initiation, verification and IPN processing.
//! - [`ensure_order_for_completed_payment`]: exactly-once order creation.

pub mod order_ensurer;
pub mod payments;

pub use order_ensurer::{EnsuredOrder, ensure_order_for_completed_payment};
pub use payments::{
    InitiateError, IpnOutcome, PaymentService, ValidationError, VerifyError,
    generate_merchant_reference,
};
