//! LoopbackPeer: a controllable in-process peer
//!
//! Implements the `tether-link` transport seam entirely in-process so the
//! connector's lifecycle handling can be exercised without a wire
//! protocol. The peer can be taken offline and back online (modelling a
//! service restart), individual capabilities can be hidden (modelling a
//! plugin that is not activated), and every capability lease is accounted
//! for so tests can assert the release-exactly-once discipline.

use crate::services::{ControllerService, DictService, MathService, WallClockService};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tether_interface::{RemoteCapability, ARITHMETIC, CONTROLLER, DICTIONARY, WALL_CLOCK};
use tether_link::{CapabilityRef, Endpoint, LeaseId, LinkError, Session, Transport};
use tokio::sync::{watch, Mutex};
use tracing::debug;

struct LeaseTable {
    next: LeaseId,
    held: HashMap<LeaseId, &'static str>,
    misreleases: u64,
}

struct PeerState {
    online: bool,
    exposed: HashSet<&'static str>,
    /// Closed-flags of live sessions; flipped when the peer goes offline.
    sessions: Vec<Arc<watch::Sender<bool>>>,
}

struct PeerInner {
    state: Mutex<PeerState>,
    // Sync lock: consulted from `Session::release`, which must work in Drop.
    leases: StdMutex<LeaseTable>,
    arithmetic: Arc<MathService>,
    dictionary: Arc<DictService>,
    wallclock: WallClockService,
    controller: Arc<ControllerService>,
}

impl PeerInner {
    fn grant(&self, capability: &'static str) -> LeaseId {
        let mut table = self
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        table.next += 1;
        let lease = table.next;
        table.held.insert(lease, capability);
        lease
    }
}

/// An in-process peer exposing the reference capability set.
///
/// # Example
///
/// ```rust,no_run
/// use tether_loopback::LoopbackPeer;
/// use tether_link::{ConnectionManager, Endpoint};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let peer = LoopbackPeer::new();
/// let endpoint = Endpoint::new("/tmp/tether-communicator".parse()?);
///
/// let manager = ConnectionManager::new(peer.transport(), endpoint);
/// manager.open(Duration::from_secs(1)).await?;
///
/// peer.set_online(false).await; // model a service stop
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LoopbackPeer {
    inner: Arc<PeerInner>,
}

impl LoopbackPeer {
    /// A peer that is online and exposes all four capabilities.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PeerInner {
                state: Mutex::new(PeerState {
                    online: true,
                    exposed: [ARITHMETIC, DICTIONARY, WALL_CLOCK, CONTROLLER]
                        .into_iter()
                        .collect(),
                    sessions: Vec::new(),
                }),
                leases: StdMutex::new(LeaseTable {
                    next: 0,
                    held: HashMap::new(),
                    misreleases: 0,
                }),
                arithmetic: Arc::new(MathService),
                dictionary: Arc::new(DictService::default()),
                wallclock: WallClockService::new(),
                controller: Arc::new(ControllerService::default()),
            }),
        }
    }

    /// A transport handle that dials this peer.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(LoopbackTransport {
            peer: Arc::clone(&self.inner),
        })
    }

    /// Take the peer offline (all live sessions observe closure) or bring
    /// it back online.
    pub async fn set_online(&self, online: bool) {
        let mut state = self.inner.state.lock().await;
        state.online = online;
        if !online {
            for closed in state.sessions.drain(..) {
                closed.send_replace(true);
            }
        }
    }

    /// Hide or expose one capability by catalog name. Unknown names are
    /// ignored (an unknown capability is simply never acquirable).
    pub async fn expose(&self, capability: &str, exposed: bool) {
        let Some(name) = catalog_name(capability) else {
            return;
        };
        let mut state = self.inner.state.lock().await;
        if exposed {
            state.exposed.insert(name);
        } else {
            state.exposed.remove(name);
        }
    }

    /// Number of capability leases currently held by clients.
    pub fn outstanding_leases(&self) -> usize {
        self.inner
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .len()
    }

    /// Number of release calls that did not match a held lease. Stays at
    /// zero when every proxy is released exactly once.
    pub fn misreleases(&self) -> u64 {
        self.inner
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .misreleases
    }

    /// Number of armed wallclock timers.
    pub async fn armed_timers(&self) -> usize {
        self.inner.wallclock.armed_count().await
    }

    /// Seed the controller's configuration line.
    pub async fn set_config_line(&self, config: impl Into<String>) {
        self.inner.controller.set_config_line(config).await;
    }

    /// The configuration most recently applied through `substitute`, if any.
    pub async fn applied_config(&self) -> Option<String> {
        self.inner.controller.applied_config().await
    }

    /// Make the controller refuse `substitute` calls.
    pub async fn reject_substitute(&self, reject: bool) {
        self.inner.controller.reject_substitute(reject).await;
    }

    /// How many times the configuration line has been fetched.
    pub async fn config_fetches(&self) -> u32 {
        self.inner.controller.fetch_count().await
    }
}

impl Default for LoopbackPeer {
    fn default() -> Self {
        Self::new()
    }
}

fn catalog_name(capability: &str) -> Option<&'static str> {
    match capability {
        ARITHMETIC => Some(ARITHMETIC),
        DICTIONARY => Some(DICTIONARY),
        WALL_CLOCK => Some(WALL_CLOCK),
        CONTROLLER => Some(CONTROLLER),
        _ => None,
    }
}

struct LoopbackTransport {
    peer: Arc<PeerInner>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Arc<dyn Session>, LinkError> {
        let mut state = self.peer.state.lock().await;
        if !state.online {
            return Err(LinkError::TransportUnavailable(format!(
                "loopback peer at {endpoint} is offline"
            )));
        }

        let closed = Arc::new(watch::channel(false).0);
        state.sessions.push(Arc::clone(&closed));
        debug!(endpoint = %endpoint, "loopback session established");

        Ok(Arc::new(LoopbackSession {
            peer: Arc::clone(&self.peer),
            closed,
        }))
    }
}

struct LoopbackSession {
    peer: Arc<PeerInner>,
    closed: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl Session for LoopbackSession {
    async fn acquire(
        &self,
        capability: &str,
        _timeout: Duration,
    ) -> Result<Option<CapabilityRef>, LinkError> {
        if *self.closed.borrow() {
            return Err(LinkError::TransportUnavailable(
                "session is closed".to_string(),
            ));
        }

        let exposed = {
            let state = self.peer.state.lock().await;
            state.online && state.exposed.contains(capability)
        };
        if !exposed {
            return Ok(None);
        }

        let capability = match capability {
            ARITHMETIC => RemoteCapability::Arithmetic(Arc::clone(&self.peer.arithmetic) as _),
            DICTIONARY => RemoteCapability::Dictionary(Arc::clone(&self.peer.dictionary) as _),
            WALL_CLOCK => RemoteCapability::WallClock(Arc::new(self.peer.wallclock.clone())),
            CONTROLLER => RemoteCapability::Controller(Arc::clone(&self.peer.controller) as _),
            _ => return Ok(None),
        };

        let lease = self.peer.grant(capability.name());
        Ok(Some(CapabilityRef { lease, capability }))
    }

    fn release(&self, lease: LeaseId) {
        let mut table = self
            .peer
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if table.held.remove(&lease).is_none() {
            table.misreleases += 1;
            debug!(lease, "release of unknown lease");
        }
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn detach(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_interface::{Arithmetic, FromCapability};

    type MathRef = Arc<dyn Arithmetic>;

    fn endpoint() -> Endpoint {
        Endpoint::new("/tmp/loopback".parse().unwrap())
    }

    #[tokio::test]
    async fn test_dial_fails_while_offline() {
        let peer = LoopbackPeer::new();
        peer.set_online(false).await;

        let result = peer
            .transport()
            .dial(&endpoint(), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(LinkError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn test_acquire_and_release_accounting() {
        let peer = LoopbackPeer::new();
        let session = peer
            .transport()
            .dial(&endpoint(), Duration::from_millis(100))
            .await
            .unwrap();

        let acquired = session
            .acquire(ARITHMETIC, Duration::from_millis(100))
            .await
            .unwrap()
            .expect("arithmetic is exposed");
        assert_eq!(peer.outstanding_leases(), 1);

        let math = MathRef::from_capability(acquired.capability.clone()).unwrap();
        assert_eq!(math.add(2, 3).await.unwrap(), 5);

        session.release(acquired.lease);
        assert_eq!(peer.outstanding_leases(), 0);

        // A stray second release is counted, not silently absorbed.
        session.release(acquired.lease);
        assert_eq!(peer.misreleases(), 1);
    }

    #[tokio::test]
    async fn test_hidden_capability_yields_none() {
        let peer = LoopbackPeer::new();
        peer.expose(WALL_CLOCK, false).await;

        let session = peer
            .transport()
            .dial(&endpoint(), Duration::from_millis(100))
            .await
            .unwrap();

        let acquired = session
            .acquire(WALL_CLOCK, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(acquired.is_none());

        // Exposing it afterwards makes it acquirable on the same session.
        peer.expose(WALL_CLOCK, true).await;
        let acquired = session
            .acquire(WALL_CLOCK, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn test_offline_closes_live_sessions() {
        let peer = LoopbackPeer::new();
        let session = peer
            .transport()
            .dial(&endpoint(), Duration::from_millis(100))
            .await
            .unwrap();

        let mut closed = session.closed();
        assert!(!*closed.borrow());

        peer.set_online(false).await;
        closed.changed().await.unwrap();
        assert!(*closed.borrow());

        let result = session.acquire(ARITHMETIC, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(LinkError::TransportUnavailable(_))));
    }
}
