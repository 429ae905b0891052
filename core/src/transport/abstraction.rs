//! Transport abstraction for advertisement-based messaging
//!
//! Defines the broadcast/scan contract a radio stack has to offer and the
//! records it yields. The link layer never touches hardware directly; it
//! drives an injected [`BroadcastTransport`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable")]
    Unavailable,
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Advertisement type a scan is filtered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisementKind {
    /// Manufacturer-data advertisements carrying a radio frame
    RadioMessage,
}

impl fmt::Display for AdvertisementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisementKind::RadioMessage => write!(f, "RadioMessage"),
        }
    }
}

/// One advertisement observed during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    /// Frame bytes carried by the advertisement
    pub payload: Vec<u8>,
    /// Signal strength: 0 = max, -255 = min (vendor scale)
    pub rssi: i16,
    /// Sender's address as reported by the radio stack
    pub sender_address: Vec<u8>,
}

impl ReceivedRecord {
    pub fn new(payload: Vec<u8>, rssi: i16, sender_address: Vec<u8>) -> Self {
        Self {
            payload,
            rssi,
            sender_address,
        }
    }
}

impl fmt::Display for ReceivedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReceivedRecord {{ sender: {}, rssi: {}, len: {} }}",
            hex::encode(&self.sender_address),
            self.rssi,
            self.payload.len()
        )
    }
}

/// Lazy, finite sequence of records produced by one scan.
///
/// A scan stream is not restartable; a fresh scan has to be started for
/// every receive.
pub type ScanStream = BoxStream<'static, Result<ReceivedRecord, TransportError>>;

/// Broadcast/scan primitives of the underlying radio stack
///
/// Implemented by platform code (BLE adapters) and by the in-tree
/// loopback and UDP transports. The stop methods are synchronous so that
/// scoped guards can release the radio from `Drop`.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Begin periodic transmission of an advertisement carrying `payload`
    async fn start_broadcast(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// End the current broadcast. Must be harmless when nothing is on air.
    fn stop_broadcast(&self) -> Result<(), TransportError>;

    /// Begin listening for advertisements of `kind`.
    ///
    /// Records weaker than `minimum_rssi` are dropped by the transport. The
    /// returned stream ends once `timeout` has elapsed or `stop_scan` is called.
    async fn start_scan(
        &self,
        kind: AdvertisementKind,
        minimum_rssi: i16,
        timeout: Duration,
    ) -> Result<ScanStream, TransportError>;

    /// End the current scan. Must be harmless when no scan is running.
    fn stop_scan(&self) -> Result<(), TransportError>;
}

// ============================================================================
// MOCK TRANSPORT (for testing)
// ============================================================================

/// A transport call recorded by [`MockBroadcastTransport`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartBroadcast(Vec<u8>),
    StopBroadcast,
    StartScan {
        kind: AdvertisementKind,
        minimum_rssi: i16,
        timeout: Duration,
    },
    StopScan,
}

#[cfg(test)]
enum ScriptedScan {
    Finite(Vec<Result<ReceivedRecord, TransportError>>),
    ThenHang(Vec<Result<ReceivedRecord, TransportError>>),
}

/// Scripted transport that records every call it receives
#[cfg(test)]
pub struct MockBroadcastTransport {
    calls: parking_lot::Mutex<Vec<TransportCall>>,
    scans: parking_lot::Mutex<std::collections::VecDeque<ScriptedScan>>,
    fail_broadcast: bool,
    fail_scan: bool,
}

#[cfg(test)]
impl MockBroadcastTransport {
    pub fn new() -> Self {
        Self {
            calls: parking_lot::Mutex::new(Vec::new()),
            scans: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            fail_broadcast: false,
            fail_scan: false,
        }
    }

    pub fn failing_broadcast() -> Self {
        Self {
            fail_broadcast: true,
            ..Self::new()
        }
    }

    pub fn failing_scan() -> Self {
        Self {
            fail_scan: true,
            ..Self::new()
        }
    }

    /// Queue the records the next scan will yield
    pub fn push_scan(&self, records: Vec<ReceivedRecord>) {
        self.scans
            .lock()
            .push_back(ScriptedScan::Finite(records.into_iter().map(Ok).collect()));
    }

    /// Queue a scan that yields the given items verbatim (errors included)
    pub fn push_scan_results(&self, results: Vec<Result<ReceivedRecord, TransportError>>) {
        self.scans.lock().push_back(ScriptedScan::Finite(results));
    }

    /// Queue a scan that yields `records` and then never ends on its own
    pub fn push_scan_then_hang(&self, records: Vec<ReceivedRecord>) {
        self.scans
            .lock()
            .push_back(ScriptedScan::ThenHang(records.into_iter().map(Ok).collect()));
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Payloads handed to `start_broadcast`, in order
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::StartBroadcast(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &TransportCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == wanted).count()
    }

    pub fn scans_started(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::StartScan { .. }))
            .count()
    }
}

#[cfg(test)]
#[async_trait]
impl BroadcastTransport for MockBroadcastTransport {
    async fn start_broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.calls
            .lock()
            .push(TransportCall::StartBroadcast(payload.to_vec()));
        if self.fail_broadcast {
            return Err(TransportError::BroadcastFailed("radio busy".to_string()));
        }
        Ok(())
    }

    fn stop_broadcast(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::StopBroadcast);
        Ok(())
    }

    async fn start_scan(
        &self,
        kind: AdvertisementKind,
        minimum_rssi: i16,
        timeout: Duration,
    ) -> Result<ScanStream, TransportError> {
        use futures::StreamExt;

        self.calls.lock().push(TransportCall::StartScan {
            kind,
            minimum_rssi,
            timeout,
        });
        if self.fail_scan {
            return Err(TransportError::ScanFailed("adapter off".to_string()));
        }

        let stream = match self.scans.lock().pop_front() {
            Some(ScriptedScan::Finite(items)) => futures::stream::iter(items).boxed(),
            Some(ScriptedScan::ThenHang(items)) => futures::stream::iter(items)
                .chain(futures::stream::pending())
                .boxed(),
            None => futures::stream::empty().boxed(),
        };
        Ok(stream)
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::StopScan);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_record_display() {
        let record = ReceivedRecord::new(vec![1, 2, 3], -40, vec![0xaa, 0xbb]);
        assert_eq!(
            record.to_string(),
            "ReceivedRecord { sender: aabb, rssi: -40, len: 3 }"
        );
    }

    #[test]
    fn test_advertisement_kind_display() {
        assert_eq!(AdvertisementKind::RadioMessage.to_string(), "RadioMessage");
    }

    #[tokio::test]
    async fn test_mock_replays_scripted_scan() {
        let mock = MockBroadcastTransport::new();
        mock.push_scan(vec![ReceivedRecord::new(vec![42, 0], -10, vec![1])]);

        let stream = mock
            .start_scan(AdvertisementKind::RadioMessage, -255, Duration::from_secs(1))
            .await
            .unwrap();
        let records: Vec<_> = stream.collect().await;
        assert_eq!(records.len(), 1);

        // Nothing scripted: the next scan is empty
        let stream = mock
            .start_scan(AdvertisementKind::RadioMessage, -255, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(stream.count().await, 0);
        assert_eq!(mock.scans_started(), 2);
    }
}
