// Loopback air — an in-process broadcast medium
//
// Every LoopbackTransport attached to the same LoopbackAir hears what the
// others broadcast. A broadcasting node re-emits its payload every
// ADVERTISING_INTERVAL until stopped, the way a radio repeats an
// advertisement, so scanners can see the same message several times.

use super::abstraction::{
    AdvertisementKind, BroadcastTransport, ReceivedRecord, ScanStream, TransportError,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Gap between repeated emissions of one advertisement
pub const ADVERTISING_INTERVAL: Duration = Duration::from_millis(100);

/// Emissions buffered per scanner before it starts lagging
const AIR_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Emission {
    sender: Vec<u8>,
    rssi: i16,
    payload: Vec<u8>,
}

/// Shared medium that attached transports broadcast into
#[derive(Clone)]
pub struct LoopbackAir {
    tx: broadcast::Sender<Emission>,
}

impl LoopbackAir {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(AIR_CAPACITY);
        Self { tx }
    }

    /// Attach a node with the given address.
    ///
    /// `rssi` is the signal strength other nodes observe for this sender.
    pub fn attach(&self, address: impl Into<Vec<u8>>, rssi: i16) -> LoopbackTransport {
        LoopbackTransport {
            air: self.clone(),
            address: address.into(),
            rssi,
            advertiser: Mutex::new(None),
            scan_stop: Mutex::new(None),
            stats: Mutex::new(TransportStats::default()),
        }
    }
}

impl Default for LoopbackAir {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of transport activity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub broadcasts_started: u64,
    pub broadcasts_stopped: u64,
    pub scans_started: u64,
    pub scans_stopped: u64,
}

/// One node on a [`LoopbackAir`]
pub struct LoopbackTransport {
    air: LoopbackAir,
    address: Vec<u8>,
    rssi: i16,
    advertiser: Mutex<Option<JoinHandle<()>>>,
    scan_stop: Mutex<Option<watch::Sender<bool>>>,
    stats: Mutex<TransportStats>,
}

impl LoopbackTransport {
    pub fn address(&self) -> &[u8] {
        &self.address
    }

    pub fn stats(&self) -> TransportStats {
        *self.stats.lock()
    }

    /// Whether an advertisement is currently on air
    pub fn is_broadcasting(&self) -> bool {
        self.advertiser.lock().is_some()
    }
}

#[async_trait]
impl BroadcastTransport for LoopbackTransport {
    async fn start_broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        let emission = Emission {
            sender: self.address.clone(),
            rssi: self.rssi,
            payload: payload.to_vec(),
        };
        let tx = self.air.tx.clone();

        let task = tokio::spawn(async move {
            loop {
                // No scanners listening is not an error on a broadcast medium
                let _ = tx.send(emission.clone());
                tokio::time::sleep(ADVERTISING_INTERVAL).await;
            }
        });

        if let Some(previous) = self.advertiser.lock().replace(task) {
            previous.abort();
        }
        self.stats.lock().broadcasts_started += 1;
        debug!(
            "Loopback node {} advertising {} bytes",
            hex::encode(&self.address),
            payload.len()
        );
        Ok(())
    }

    fn stop_broadcast(&self) -> Result<(), TransportError> {
        if let Some(task) = self.advertiser.lock().take() {
            task.abort();
        }
        self.stats.lock().broadcasts_stopped += 1;
        Ok(())
    }

    async fn start_scan(
        &self,
        kind: AdvertisementKind,
        minimum_rssi: i16,
        timeout: Duration,
    ) -> Result<ScanStream, TransportError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        // Replacing the sender ends any scan still running
        *self.scan_stop.lock() = Some(stop_tx);
        self.stats.lock().scans_started += 1;
        trace!(
            "Loopback node {} scanning for {} ({:?})",
            hex::encode(&self.address),
            kind,
            timeout
        );

        let scan = LoopbackScan {
            rx: self.air.tx.subscribe(),
            stop: stop_rx,
            deadline: Instant::now() + timeout,
            own_address: self.address.clone(),
            minimum_rssi,
        };

        let stream = futures::stream::unfold(scan, |mut scan| async move {
            let record = scan.next_record().await?;
            Some((Ok(record), scan))
        });
        Ok(stream.boxed())
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        self.scan_stop.lock().take();
        self.stats.lock().scans_stopped += 1;
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(task) = self.advertiser.lock().take() {
            task.abort();
        }
    }
}

struct LoopbackScan {
    rx: broadcast::Receiver<Emission>,
    stop: watch::Receiver<bool>,
    deadline: Instant,
    own_address: Vec<u8>,
    minimum_rssi: i16,
}

impl LoopbackScan {
    async fn next_record(&mut self) -> Option<ReceivedRecord> {
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Ok(emission) => {
                        if emission.sender == self.own_address
                            || emission.rssi < self.minimum_rssi
                        {
                            continue;
                        }
                        return Some(ReceivedRecord::new(
                            emission.payload,
                            emission.rssi,
                            emission.sender,
                        ));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        trace!("Loopback scanner lagged, {} emissions missed", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = tokio::time::sleep_until(self.deadline) => return None,
                // Fires when stop_scan drops the sender
                _ = self.stop.changed() => return None,
            }
        }
    }
}
