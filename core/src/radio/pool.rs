// Message pool — time-windowed duplicate suppression
//
// A broadcaster repeats the same advertisement for its whole on-air window,
// so a scanner can observe one message several times. The pool remembers
// which (channel, sequence, sender) instances were accepted recently and
// forgets them once the window has passed.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Identifies one message instance from one sender on one channel.
///
/// Only meaningful inside the dedup window: sequence bytes wrap, so the
/// same key will legitimately reappear later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub channel: u8,
    pub sequence: u8,
    pub sender_address: Vec<u8>,
}

impl DedupKey {
    pub fn new(channel: u8, sequence: u8, sender_address: Vec<u8>) -> Self {
        Self {
            channel,
            sequence,
            sender_address,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{}/seq{}/{}",
            self.channel,
            self.sequence,
            hex::encode(&self.sender_address)
        )
    }
}

/// A remembered observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub seen_at: Instant,
    pub key: DedupKey,
}

/// Recently accepted message instances, at most one entry per key
#[derive(Debug)]
pub struct MessagePool {
    entries: HashMap<DedupKey, Instant>,
    window: Duration,
}

impl MessagePool {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    /// Length of the dedup window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop every entry older than `now - window`. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.entries.len();
        self.entries
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) <= window);
        before - self.entries.len()
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remember `key` as seen at `now`
    pub fn insert(&mut self, key: DedupKey, now: Instant) {
        self.entries.insert(key, now);
    }

    /// Purge, then check and record in one step.
    ///
    /// Returns `true` when `key` is new (and is now remembered), `false`
    /// when it is a duplicate within the window.
    pub fn observe(&mut self, key: DedupKey, now: Instant) -> bool {
        self.purge_expired(now);
        if self.contains(&key) {
            return false;
        }
        self.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the current entries, oldest first
    pub fn entries(&self) -> Vec<DedupEntry> {
        let mut entries: Vec<DedupEntry> = self
            .entries
            .iter()
            .map(|(key, seen_at)| DedupEntry {
                seen_at: *seen_at,
                key: key.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.seen_at);
        entries
    }
}
