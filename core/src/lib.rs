// adradio core — connectionless messaging over BLE advertisements
//
// A message is a tiny frame (channel, sequence, payload) broadcast as
// manufacturer data for half a second. Anyone in range on the same channel
// picks it up; nobody connects, nobody acknowledges.

pub mod frame;
pub mod radio;
pub mod transport;

use std::string::FromUtf8Error;
use thiserror::Error;

pub use frame::{Frame, FrameError, FRAME_HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD};
pub use radio::pool::{DedupEntry, DedupKey, MessagePool};
pub use radio::{
    validate_channel, RadioConfig, RadioLink, ReceivedMessage, AD_DURATION, DEFAULT_CHANNEL,
    MINIMUM_RSSI, SCAN_TIMEOUT,
};
pub use transport::{
    AdvertisementKind, BroadcastTransport, LoopbackAir, LoopbackTransport, ReceivedRecord,
    ScanStream, TransportError, UdpAirConfig, UdpAirTransport,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("Invalid channel {0}: must be within 0-255")]
    InvalidChannel(i64),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Payload is not valid UTF-8: {0}")]
    Decode(#[from] FromUtf8Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Radio link is shut down")]
    Shutdown,
}
