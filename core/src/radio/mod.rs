// Radio link — channel-filtered, deduplicated messaging over advertisements
//
// Sending frames the payload with the current channel and sequence byte and
// keeps it on air for AD_DURATION. Receiving runs one bounded scan and
// returns the first frame on our channel that is not a repeat of something
// accepted within the last AD_DURATION.

pub(crate) mod guard;
pub mod pool;
pub mod shutdown;

use crate::frame::{self, FrameError, MAX_PAYLOAD};
use crate::transport::{AdvertisementKind, BroadcastTransport, ReceivedRecord};
use crate::RadioError;
use futures::StreamExt;
use guard::TransportGuard;
use parking_lot::Mutex;
use pool::{DedupEntry, DedupKey, MessagePool};
use serde::{Deserialize, Serialize};
use shutdown::ShutdownSignal;
use std::string::FromUtf8Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// How long one message stays on air; also the dedup window
pub const AD_DURATION: Duration = Duration::from_millis(500);

/// Upper bound on a single receive scan
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(1);

/// Accept advertisements of any strength
pub const MINIMUM_RSSI: i16 = -255;

pub const DEFAULT_CHANNEL: u8 = 42;

/// Link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Logical channel (0-255) the link sends and listens on
    pub channel: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
        }
    }
}

impl RadioConfig {
    /// Create a configuration, validating the channel
    pub fn new(channel: impl Into<i64>) -> Result<Self, RadioError> {
        Ok(Self {
            channel: validate_channel(channel)?,
        })
    }
}

/// Check that `channel` is within 0-255
pub fn validate_channel(channel: impl Into<i64>) -> Result<u8, RadioError> {
    let channel = channel.into();
    u8::try_from(channel).map_err(|_| RadioError::InvalidChannel(channel))
}

/// A newly accepted message
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Payload with framing removed
    pub payload: Vec<u8>,
    /// Signal strength: 0 = max, -255 = min
    pub rssi: i16,
    /// Seconds since the link was created (monotonic)
    pub timestamp: f64,
    /// Sender address reported by the transport
    pub sender_address: Vec<u8>,
}

impl ReceivedMessage {
    /// Decode the payload as UTF-8, dropping trailing NUL padding
    pub fn into_text(self) -> Result<String, FromUtf8Error> {
        let text = String::from_utf8(self.payload)?;
        Ok(text.trim_end_matches('\0').to_string())
    }
}

struct LinkState {
    config: RadioConfig,
    sequence: u8,
    pool: MessagePool,
}

/// What to do with one scanned record
enum Verdict {
    Accepted(ReceivedMessage),
    Duplicate(DedupKey),
    Skipped,
}

/// Connectionless messaging endpoint over a [`BroadcastTransport`]
///
/// All operations take `&self`; on-air operations are serialized so a
/// single radio never broadcasts and scans for two callers at once. Share
/// it across tasks with an `Arc`.
pub struct RadioLink {
    transport: Arc<dyn BroadcastTransport>,
    state: Mutex<LinkState>,
    air: tokio::sync::Mutex<()>,
    shutdown: ShutdownSignal,
    epoch: Instant,
}

impl RadioLink {
    /// Create a link on the default channel
    pub fn new(transport: Arc<dyn BroadcastTransport>) -> Self {
        Self::with_config(transport, RadioConfig::default())
    }

    /// Create a link on `channel`, which must be within 0-255
    pub fn with_channel(
        transport: Arc<dyn BroadcastTransport>,
        channel: impl Into<i64>,
    ) -> Result<Self, RadioError> {
        Ok(Self::with_config(transport, RadioConfig::new(channel)?))
    }

    pub fn with_config(transport: Arc<dyn BroadcastTransport>, config: RadioConfig) -> Self {
        Self {
            transport,
            state: Mutex::new(LinkState {
                config,
                sequence: 0,
                pool: MessagePool::new(AD_DURATION),
            }),
            air: tokio::sync::Mutex::new(()),
            shutdown: ShutdownSignal::new(),
            epoch: Instant::now(),
        }
    }

    /// Tune the link to another channel.
    ///
    /// Takes effect for subsequent sends and receives. On error the
    /// current channel is kept.
    pub fn configure(&self, channel: impl Into<i64>) -> Result<(), RadioError> {
        let channel = validate_channel(channel)?;
        let mut state = self.state.lock();
        if state.config.channel != channel {
            info!("Radio channel {} -> {}", state.config.channel, channel);
        }
        state.config.channel = channel;
        Ok(())
    }

    pub fn channel(&self) -> u8 {
        self.state.lock().config.channel
    }

    /// Sequence byte the next send will use
    pub fn sequence(&self) -> u8 {
        self.state.lock().sequence
    }

    pub fn config(&self) -> RadioConfig {
        self.state.lock().config
    }

    /// Number of entries currently held for duplicate suppression
    pub fn pool_len(&self) -> usize {
        self.state.lock().pool.len()
    }

    pub fn pool_entries(&self) -> Vec<DedupEntry> {
        self.state.lock().pool.entries()
    }

    /// Stop the link: in-flight operations release the radio and return
    /// [`RadioError::Shutdown`], later operations fail immediately.
    pub fn shutdown(&self) {
        if !self.shutdown.is_signalled() {
            info!("Radio link shutting down");
        }
        self.shutdown.signal();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_signalled()
    }

    /// Broadcast a string as UTF-8
    pub async fn send(&self, message: &str) -> Result<(), RadioError> {
        self.send_bytes(message.as_bytes()).await
    }

    /// Broadcast `payload` on the current channel for [`AD_DURATION`]
    pub async fn send_bytes(&self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }

        let _air = self.air.lock().await;
        let mut stop = self.shutdown.listen();
        if self.shutdown.is_signalled() {
            return Err(RadioError::Shutdown);
        }

        let (channel, sequence) = {
            let state = self.state.lock();
            (state.config.channel, state.sequence)
        };
        let frame = frame::encode(channel, sequence, payload)?;

        let on_air = TransportGuard::broadcast(self.transport.as_ref());
        self.transport.start_broadcast(&frame).await?;
        self.state.lock().sequence = sequence.wrapping_add(1);

        debug!(
            "Broadcasting {} bytes on channel {} (seq {})",
            payload.len(),
            channel,
            sequence
        );

        tokio::select! {
            _ = tokio::time::sleep(AD_DURATION) => {}
            _ = stop.wait() => {
                debug!("Broadcast seq {} cut short by shutdown", sequence);
                return Err(RadioError::Shutdown);
            }
        }

        on_air.release()?;
        Ok(())
    }

    /// Receive one new message as a string, NUL padding stripped
    pub async fn receive(&self) -> Result<Option<String>, RadioError> {
        match self.receive_full().await? {
            Some(message) => Ok(Some(message.into_text()?)),
            None => Ok(None),
        }
    }

    /// Scan for at most [`SCAN_TIMEOUT`] and return the first new message
    /// on our channel.
    ///
    /// Returns `Ok(None)` when the scan ends without one, and also as soon
    /// as a duplicate of a recently accepted message is seen.
    pub async fn receive_full(&self) -> Result<Option<ReceivedMessage>, RadioError> {
        let _air = self.air.lock().await;
        let mut stop = self.shutdown.listen();
        if self.shutdown.is_signalled() {
            return Err(RadioError::Shutdown);
        }

        let _scan = TransportGuard::scan(self.transport.as_ref());
        let mut records = self
            .transport
            .start_scan(AdvertisementKind::RadioMessage, MINIMUM_RSSI, SCAN_TIMEOUT)
            .await?;
        let deadline = Instant::now() + SCAN_TIMEOUT;

        loop {
            let next = tokio::select! {
                next = records.next() => next,
                _ = tokio::time::sleep_until(deadline) => {
                    trace!("Scan deadline reached");
                    None
                }
                _ = stop.wait() => return Err(RadioError::Shutdown),
            };

            let Some(record) = next else {
                return Ok(None);
            };

            match self.evaluate(record?) {
                Verdict::Accepted(message) => return Ok(Some(message)),
                Verdict::Duplicate(key) => {
                    trace!("Duplicate {} within dedup window", key);
                    return Ok(None);
                }
                Verdict::Skipped => continue,
            }
        }
    }

    fn evaluate(&self, record: ReceivedRecord) -> Verdict {
        let frame = match frame::decode(&record.payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Skipping malformed record {}: {}", record, e);
                return Verdict::Skipped;
            }
        };

        let mut state = self.state.lock();
        if frame.channel != state.config.channel {
            trace!(
                "Skipping channel {} record (tuned to {})",
                frame.channel,
                state.config.channel
            );
            return Verdict::Skipped;
        }

        let now = Instant::now();
        let key = DedupKey::new(frame.channel, frame.sequence, record.sender_address.clone());
        if !state.pool.observe(key.clone(), now) {
            return Verdict::Duplicate(key);
        }

        debug!(
            "Accepted {} ({} bytes, rssi {})",
            key,
            frame.payload.len(),
            record.rssi
        );

        Verdict::Accepted(ReceivedMessage {
            payload: frame.payload,
            rssi: record.rssi,
            timestamp: now.duration_since(self.epoch).as_secs_f64(),
            sender_address: record.sender_address,
        })
    }
}
