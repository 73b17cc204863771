//! Event channel factories and handles.

use super::types::IpnReceived;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for IpnReceived events.
pub type IpnReceivedSender = mpsc::Sender<IpnReceived>;
/// Receiver handle for IpnReceived events.
pub type IpnReceivedReceiver = mpsc::Receiver<IpnReceived>;

/// Create a new IpnReceived channel.
///
/// The webhook handler holds the sender and never waits on it; a full
/// buffer drops the event.
pub fn ipn_received_channel() -> (IpnReceivedSender, IpnReceivedReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
