#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod gateway;
pub mod idempotency;
pub mod processors;
pub mod repository;
pub mod retry;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
