//! Shutdown signal shared between a link and its in-flight operations.
//!
//! Built on a `watch` channel: the value only ever moves from `false` to
//! `true`, so any observed change means "stop".

use tokio::sync::watch;

pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal shutdown. Idempotent.
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Listener for one operation, to be raced in `tokio::select!`
    pub fn listen(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been signalled (immediately if it already was)
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone: the link itself was dropped
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_wakes_listener() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.listen();

        let (woke, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), listener.wait()),
            async { signal.signal() }
        );
        assert!(woke.is_ok());
        assert!(signal.is_signalled());
    }

    #[tokio::test]
    async fn test_listener_created_after_signal_resolves() {
        let signal = ShutdownSignal::new();
        signal.signal();
        signal.signal();

        let mut listener = signal.listen();
        let woke = tokio::time::timeout(Duration::from_millis(10), listener.wait()).await;
        assert!(woke.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_pending_without_signal() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.listen();

        let woke = tokio::time::timeout(Duration::from_millis(50), listener.wait()).await;
        assert!(woke.is_err());
        assert!(!signal.is_signalled());
    }
}
