//! HTTP API handlers.
//!
//! - [`payments`]: checkout initiation and verification, under `/api/payments`
//! - [`webhooks`]: gateway notifications, under `/api/webhooks`

pub mod extractors;
pub mod payments;
pub mod webhooks;
