//! Scoped ownership of the transport's broadcast and scan resources.
//!
//! A guard is armed before the transport is started and stops it when
//! released or dropped, so every exit path (normal return, early return,
//! `?` propagation, shutdown, or the caller dropping the future) leaves the
//! radio idle.

use crate::transport::{BroadcastTransport, TransportError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Broadcast,
    Scan,
}

pub(crate) struct TransportGuard<'a> {
    transport: &'a dyn BroadcastTransport,
    resource: Resource,
    armed: bool,
}

impl<'a> TransportGuard<'a> {
    pub(crate) fn broadcast(transport: &'a dyn BroadcastTransport) -> Self {
        Self {
            transport,
            resource: Resource::Broadcast,
            armed: true,
        }
    }

    pub(crate) fn scan(transport: &'a dyn BroadcastTransport) -> Self {
        Self {
            transport,
            resource: Resource::Scan,
            armed: true,
        }
    }

    /// Stop the resource now and surface any stop failure to the caller
    pub(crate) fn release(mut self) -> Result<(), TransportError> {
        self.armed = false;
        self.stop()
    }

    fn stop(&self) -> Result<(), TransportError> {
        match self.resource {
            Resource::Broadcast => self.transport.stop_broadcast(),
            Resource::Scan => self.transport.stop_scan(),
        }
    }
}

impl Drop for TransportGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("Failed to stop {:?} during cleanup: {}", self.resource, e);
        }
    }
}
