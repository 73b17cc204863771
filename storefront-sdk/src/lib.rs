//! Shared types for the storefront payment service.
//!
//! - [`objects`]: request and response bodies of the storefront HTTP API.
//! - [`pesapal`]: the Pesapal v3 wire contract and, behind the `client`
//!   feature, a typed HTTP client for it.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod pesapal;
