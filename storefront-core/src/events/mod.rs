//! Events handed from the HTTP layer to background processors.
//!
//! The IPN webhook acknowledges the gateway immediately and sends an
//! [`IpnReceived`] to the [`IpnProcessor`](crate::processors::IpnProcessor),
//! which re-reads everything it needs from the gateway and the database.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, IpnReceivedReceiver, IpnReceivedSender, ipn_received_channel,
};
pub use types::IpnReceived;
