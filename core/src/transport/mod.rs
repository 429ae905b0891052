// Transport module — advertisement broadcast/scan backends

pub mod abstraction;
pub mod advertisement;
pub mod loopback;
pub mod udp;

pub use abstraction::{
    AdvertisementKind, BroadcastTransport, ReceivedRecord, ScanStream, TransportError,
};
pub use advertisement::{
    decode_advertisement, encode_advertisement, AdvertisementError, ADAFRUIT_COMPANY_ID,
    ADVERTISEMENT_OVERHEAD, LEGACY_ADVERTISEMENT_MAX, MANUFACTURER_DATA_ADT, RADIO_DATA_ID,
};
pub use loopback::{LoopbackAir, LoopbackTransport, TransportStats, ADVERTISING_INTERVAL};
pub use udp::{UdpAirConfig, UdpAirTransport, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT, NOMINAL_RSSI};
