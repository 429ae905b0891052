//! UDP multicast air — advertisement transport without radio hardware.
//!
//! Each broadcast repeatedly sends the manufacturer-data advertisement to an
//! IPv4 multicast group; each scan listens on that group. Several processes
//! on one host (or on one LAN segment) then behave like radios in range of
//! each other.
//!
//! Datagram layout: a 6-byte node tag (process id BE, send port BE) followed
//! by the advertisement. The tag lets a node recognise its own emissions when
//! multicast loop hands them back.
//!
//! UDP has no signal strength, so every record carries [`NOMINAL_RSSI`].
//! The sender address is the datagram's source IPv4 octets followed by the
//! big-endian source port.

use super::abstraction::{
    AdvertisementKind, BroadcastTransport, ReceivedRecord, ScanStream, TransportError,
};
use super::advertisement::{decode_advertisement, encode_advertisement};
use super::loopback::ADVERTISING_INTERVAL;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

pub const DEFAULT_PORT: u16 = 42420;

/// Signal strength reported for every UDP record (0 = max)
pub const NOMINAL_RSSI: i16 = 0;

/// Comfortably above the largest legacy advertisement
const RECV_BUFFER: usize = 256;

/// Process id (4) + send port (2)
pub const NODE_TAG_LEN: usize = 6;

type NodeTag = [u8; NODE_TAG_LEN];

/// Configuration for a [`UdpAirTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpAirConfig {
    /// Multicast group standing in for the shared radio medium
    pub group: Ipv4Addr,
    /// UDP port all nodes use
    pub port: u16,
    /// Local interface to join the group on (unspecified = OS default)
    pub interface: Ipv4Addr,
}

impl Default for UdpAirConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl UdpAirConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if !self.group.is_multicast() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a multicast address", self.group),
            )));
        }
        if self.port == 0 {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "port must be > 0",
            )));
        }
        Ok(())
    }

    fn target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }
}

/// Advertisement transport over IPv4 multicast
pub struct UdpAirTransport {
    config: UdpAirConfig,
    send_socket: Arc<UdpSocket>,
    recv_socket: Arc<UdpSocket>,
    local_port: u16,
    tag: NodeTag,
    advertiser: Mutex<Option<JoinHandle<()>>>,
    scan_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl UdpAirTransport {
    /// Open the send socket and join the multicast group
    pub async fn bind(config: UdpAirConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let recv_socket = UdpSocket::from_std(Self::create_multicast_socket(&config)?)?;

        let send_socket = UdpSocket::bind(SocketAddrV4::new(config.interface, 0)).await?;
        send_socket.set_multicast_loop_v4(true)?;
        send_socket.set_multicast_ttl_v4(1)?;
        let local_port = send_socket.local_addr()?.port();

        info!(
            "UDP air joined {}:{} (sending from port {})",
            config.group, config.port, local_port
        );

        Ok(Self {
            config,
            send_socket: Arc::new(send_socket),
            recv_socket: Arc::new(recv_socket),
            local_port,
            tag: node_tag(std::process::id(), local_port),
            advertiser: Mutex::new(None),
            scan_stop: Mutex::new(None),
        })
    }

    /// Receive socket shared by every process on this host
    fn create_multicast_socket(config: &UdpAirConfig) -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;

        socket.bind(&SockAddr::from(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            config.port,
        )))?;
        socket.join_multicast_v4(&config.group, &config.interface)?;

        Ok(socket.into())
    }

    pub fn config(&self) -> &UdpAirConfig {
        &self.config
    }

    /// Source port of our own datagrams
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Throw away datagrams queued while nobody was scanning.
    ///
    /// The socket stays joined between scans; a radio only hears what is
    /// on air while it listens.
    fn drain_backlog(&self) -> usize {
        let mut buf = [0u8; RECV_BUFFER];
        let mut drained = 0;
        loop {
            match self.recv_socket.try_recv_from(&mut buf) {
                Ok(_) => drained += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return drained,
                Err(e) => {
                    warn!("UDP air drain stopped early: {}", e);
                    return drained;
                }
            }
        }
    }
}

#[async_trait]
impl BroadcastTransport for UdpAirTransport {
    async fn start_broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        let advertisement = encode_advertisement(payload)
            .map_err(|e| TransportError::BroadcastFailed(e.to_string()))?;
        let mut datagram = self.tag.to_vec();
        datagram.extend_from_slice(&advertisement);
        let target = self.config.target();

        // First emission inline so a dead socket is reported to the caller
        self.send_socket.send_to(&datagram, target).await?;

        let socket = self.send_socket.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ADVERTISING_INTERVAL).await;
                if let Err(e) = socket.send_to(&datagram, target).await {
                    warn!("UDP air emission failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.advertiser.lock().replace(task) {
            previous.abort();
        }
        debug!("UDP air advertising {} bytes", payload.len());
        Ok(())
    }

    fn stop_broadcast(&self) -> Result<(), TransportError> {
        if let Some(task) = self.advertiser.lock().take() {
            task.abort();
        }
        Ok(())
    }

    async fn start_scan(
        &self,
        kind: AdvertisementKind,
        minimum_rssi: i16,
        timeout: Duration,
    ) -> Result<ScanStream, TransportError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.scan_stop.lock() = Some(stop_tx);

        let stale = self.drain_backlog();
        if stale > 0 {
            trace!("Dropped {} datagrams received before the scan", stale);
        }
        trace!("UDP air scanning for {} ({:?})", kind, timeout);

        let scan = UdpScan {
            socket: self.recv_socket.clone(),
            stop: stop_rx,
            deadline: Instant::now() + timeout,
            tag: self.tag,
            minimum_rssi,
        };

        let stream = futures::stream::unfold(scan, |mut scan| async move {
            let item = scan.next_record().await?;
            Some((item, scan))
        });
        Ok(stream.boxed())
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        self.scan_stop.lock().take();
        Ok(())
    }
}

impl Drop for UdpAirTransport {
    fn drop(&mut self) {
        if let Some(task) = self.advertiser.lock().take() {
            task.abort();
        }
    }
}

struct UdpScan {
    socket: Arc<UdpSocket>,
    stop: watch::Receiver<bool>,
    deadline: Instant,
    tag: NodeTag,
    minimum_rssi: i16,
}

impl UdpScan {
    async fn next_record(&mut self) -> Option<Result<ReceivedRecord, TransportError>> {
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match received {
                        Ok(received) => received,
                        Err(e) => return Some(Err(TransportError::Io(e))),
                    };
                    // Multicast loop hands our own emissions back to us
                    let Some(advertisement) = foreign_advertisement(&buf[..len], &self.tag) else {
                        continue;
                    };
                    if NOMINAL_RSSI < self.minimum_rssi {
                        continue;
                    }
                    match decode_advertisement(advertisement) {
                        Ok(frame) => {
                            return Some(Ok(ReceivedRecord::new(
                                frame,
                                NOMINAL_RSSI,
                                sender_address(&source),
                            )));
                        }
                        Err(e) => trace!("Ignoring datagram from {}: {}", source, e),
                    }
                }
                _ = tokio::time::sleep_until(self.deadline) => return None,
                _ = self.stop.changed() => return None,
            }
        }
    }
}

fn node_tag(pid: u32, port: u16) -> NodeTag {
    let mut tag = [0u8; NODE_TAG_LEN];
    tag[..4].copy_from_slice(&pid.to_be_bytes());
    tag[4..].copy_from_slice(&port.to_be_bytes());
    tag
}

/// Advertisement carried by a datagram, unless it is ours or has no tag
fn foreign_advertisement<'a>(datagram: &'a [u8], own_tag: &NodeTag) -> Option<&'a [u8]> {
    if datagram.len() < NODE_TAG_LEN || datagram[..NODE_TAG_LEN] == own_tag[..] {
        return None;
    }
    Some(&datagram[NODE_TAG_LEN..])
}

/// Address bytes for a datagram source: IP octets, then port (BE)
pub fn sender_address(source: &SocketAddr) -> Vec<u8> {
    let mut address = match source.ip() {
        std::net::IpAddr::V4(ip) => ip.octets().to_vec(),
        std::net::IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    address.extend_from_slice(&source.port().to_be_bytes());
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = UdpAirConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target().to_string(), "239.255.42.99:42420");
    }

    #[test]
    fn test_reject_unicast_group() {
        let config = UdpAirConfig {
            group: Ipv4Addr::new(192, 168, 1, 10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_port_zero() {
        let config = UdpAirConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sender_address_layout() {
        let source: SocketAddr = "10.0.0.7:4242".parse().unwrap();
        assert_eq!(sender_address(&source), vec![10, 0, 0, 7, 0x10, 0x92]);
    }

    #[test]
    fn test_own_emissions_are_recognised_by_tag() {
        let ours = node_tag(1234, 50000);
        let mut datagram = ours.to_vec();
        datagram.extend_from_slice(b"adv");
        assert_eq!(foreign_advertisement(&datagram, &ours), None);
    }

    #[test]
    fn test_foreign_node_sharing_our_port_is_heard() {
        // Another host picked the same ephemeral port
        let ours = node_tag(1234, 50000);
        let mut datagram = node_tag(987, 50000).to_vec();
        datagram.extend_from_slice(b"adv");
        assert_eq!(foreign_advertisement(&datagram, &ours), Some(&b"adv"[..]));
    }

    #[test]
    fn test_untagged_datagram_is_ignored() {
        let ours = node_tag(1, 2);
        assert_eq!(foreign_advertisement(&[0x01, 0x02], &ours), None);
    }

    #[test]
    fn test_config_serialization() {
        let config = UdpAirConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: UdpAirConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[tokio::test]
    #[ignore = "needs a network interface with multicast enabled"]
    async fn test_two_nodes_over_multicast() {
        let config = UdpAirConfig {
            port: 42421,
            ..Default::default()
        };
        let alice = UdpAirTransport::bind(config.clone()).await.unwrap();
        let bob = UdpAirTransport::bind(config).await.unwrap();

        let mut scan = bob
            .start_scan(AdvertisementKind::RadioMessage, -255, Duration::from_secs(2))
            .await
            .unwrap();
        alice.start_broadcast(b"\x2a\x00udp").await.unwrap();

        let record = scan.next().await.unwrap().unwrap();
        assert_eq!(record.payload, b"\x2a\x00udp".to_vec());
        assert_eq!(record.rssi, NOMINAL_RSSI);

        alice.stop_broadcast().unwrap();
        bob.stop_scan().unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a network interface with multicast enabled"]
    async fn test_datagrams_sent_before_scan_are_not_delivered() {
        use crate::RadioLink;

        let config = UdpAirConfig {
            port: 42422,
            ..Default::default()
        };
        let alice = RadioLink::new(Arc::new(UdpAirTransport::bind(config.clone()).await.unwrap()));
        let bob = RadioLink::new(Arc::new(UdpAirTransport::bind(config).await.unwrap()));

        // Bob is idle for the whole on-air window
        alice.send("hello").await.unwrap();
        tokio::time::sleep(crate::AD_DURATION + Duration::from_millis(100)).await;

        assert_eq!(bob.receive().await.unwrap(), None);
        assert_eq!(bob.receive().await.unwrap(), None);
    }
}
