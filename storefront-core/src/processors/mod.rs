//! Background processors.
//!
//! - `IpnProcessor`: receives `IpnReceived`, runs IPN processing per event
//! - `LedgerSweeper`: purges expired idempotency ledger entries on a timer

pub mod ipn_processor;
pub mod ledger_sweeper;

pub use ipn_processor::IpnProcessor;
pub use ledger_sweeper::LedgerSweeper;
