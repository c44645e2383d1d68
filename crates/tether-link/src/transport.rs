//! Transport seam: the opaque wire layer the connector sits on top of
//!
//! Tether does not define an RPC protocol or wire format. The transport
//! and its sessions are trait objects supplied by the embedder — a gRPC
//! channel, a domain socket, or the in-process reference peer from
//! `tether-loopback`. The connector only relies on the contract below:
//! dial an endpoint, acquire named capabilities with reference-counted
//! leases, and observe session loss.

use crate::endpoint::Endpoint;
use crate::error::LinkError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tether_interface::RemoteCapability;
use tokio::sync::watch;

/// Identifies one held reference on the peer side. Returned by
/// [`Session::acquire`] and consumed by [`Session::release`].
pub type LeaseId = u64;

/// One acquired capability: the typed interface plus the lease that must
/// be released exactly once when the holder is done.
#[derive(Debug, Clone)]
pub struct CapabilityRef {
    pub lease: LeaseId,
    pub capability: RemoteCapability,
}

/// An established connection to one peer.
#[async_trait]
pub trait Session: Send + Sync {
    /// Ask the peer for the capability named `capability`. `Ok(None)`
    /// means the peer does not expose it — a normal, checkable outcome.
    /// May block on I/O up to `timeout`.
    async fn acquire(
        &self,
        capability: &str,
        timeout: Duration,
    ) -> Result<Option<CapabilityRef>, LinkError>;

    /// Return one held reference. Synchronous bookkeeping only — safe to
    /// call from `Drop`. Releasing an unknown lease is ignored by the
    /// peer (and counted, so tests can assert it never happens).
    fn release(&self, lease: LeaseId);

    /// Observe session loss: the receiver yields `true` once the peer
    /// side of this session has gone away.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Client-side teardown of this session. Idempotent.
    fn detach(&self);
}

/// Dials endpoints. Implementations own reconnection at the socket level
/// only — lifecycle supervision lives in `ConnectionManager`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn Session>, LinkError>;
}
