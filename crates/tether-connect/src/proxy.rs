//! Reference-counted capability proxies.
//!
//! A [`Proxy`] pairs a typed interface handle with the lease the peer granted
//! for it. Releasing consumes the proxy, so a second release is not
//! expressible; dropping a proxy that was never explicitly released returns
//! the lease exactly once.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use tether_interface::FromCapability;
use tether_link::{LeaseId, Session};

/// A typed handle to a remote capability, tied to the lease that backs it.
pub struct Proxy<T> {
    interface: T,
    session: Arc<dyn Session>,
    lease: LeaseId,
    released: bool,
}

impl<T: FromCapability> Proxy<T> {
    /// Acquire the capability `T` names over an operational session.
    ///
    /// Returns `None` when the capability is not exposed, the acquisition
    /// timed out, or the peer handed back a different flavor than requested.
    /// Absence is an expected outcome, not an error; the cause is logged at
    /// debug level.
    pub async fn bind(session: &Arc<dyn Session>, timeout: Duration) -> Option<Self> {
        let granted = match session.acquire(T::CAPABILITY, timeout).await {
            Ok(granted) => granted?,
            Err(error) => {
                debug!(capability = T::CAPABILITY, %error, "capability acquisition failed");
                return None;
            }
        };
        match T::from_capability(granted.capability) {
            Some(interface) => Some(Self {
                interface,
                session: Arc::clone(session),
                lease: granted.lease,
                released: false,
            }),
            None => {
                // Peer exposed something else under this name; hand the
                // lease straight back.
                debug!(capability = T::CAPABILITY, "peer granted an unexpected capability flavor");
                session.release(granted.lease);
                None
            }
        }
    }

    /// The typed interface behind this proxy.
    pub fn interface(&self) -> &T {
        &self.interface
    }

    /// Return the lease to the peer. Consumes the proxy: releasing twice
    /// does not compile.
    pub fn release(self) {}
}

impl<T> Drop for Proxy<T> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.session.release(self.lease);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::watch;

    use tether_interface::{Arithmetic, CallError, RemoteCapability, ARITHMETIC};
    use tether_link::{CapabilityRef, LinkError};

    struct NullMath;

    #[async_trait]
    impl Arithmetic for NullMath {
        async fn add(&self, a: u16, b: u16) -> Result<u16, CallError> {
            Ok(a + b)
        }

        async fn sub(&self, a: u16, b: u16) -> Result<u16, CallError> {
            Ok(a - b)
        }
    }

    /// Grants a fixed capability and records every release it sees.
    struct RecordingSession {
        grant: Mutex<Option<RemoteCapability>>,
        next_lease: AtomicU32,
        releases: Mutex<Vec<LeaseId>>,
        _closed_tx: watch::Sender<bool>,
        closed: watch::Receiver<bool>,
    }

    impl RecordingSession {
        fn new(grant: Option<RemoteCapability>) -> Arc<Self> {
            let (_closed_tx, closed) = watch::channel(false);
            Arc::new(Self {
                grant: Mutex::new(grant),
                next_lease: AtomicU32::new(1),
                releases: Mutex::new(Vec::new()),
                _closed_tx,
                closed,
            })
        }

        fn releases(&self) -> Vec<LeaseId> {
            self.releases.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Session for RecordingSession {
        async fn acquire(
            &self,
            _capability: &str,
            _timeout: Duration,
        ) -> Result<Option<CapabilityRef>, LinkError> {
            Ok(self.grant.lock().unwrap().take().map(|capability| CapabilityRef {
                lease: u64::from(self.next_lease.fetch_add(1, Ordering::SeqCst)),
                capability,
            }))
        }

        fn release(&self, lease: LeaseId) {
            self.releases.lock().unwrap().push(lease);
        }

        fn closed(&self) -> watch::Receiver<bool> {
            self.closed.clone()
        }

        fn detach(&self) {}
    }

    #[tokio::test]
    async fn explicit_release_returns_the_lease_once() {
        let session = RecordingSession::new(Some(RemoteCapability::Arithmetic(Arc::new(NullMath))));
        let generic: Arc<dyn Session> = session.clone();

        let proxy = Proxy::<Arc<dyn Arithmetic>>::bind(&generic, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(proxy.interface().add(2, 3).await.unwrap(), 5);

        proxy.release();
        assert_eq!(session.releases(), vec![1]);
    }

    #[tokio::test]
    async fn drop_releases_when_never_released_explicitly() {
        let session = RecordingSession::new(Some(RemoteCapability::Arithmetic(Arc::new(NullMath))));
        let generic: Arc<dyn Session> = session.clone();

        {
            let _proxy = Proxy::<Arc<dyn Arithmetic>>::bind(&generic, Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(session.releases(), vec![1]);
    }

    #[tokio::test]
    async fn absent_capability_binds_to_none() {
        let session = RecordingSession::new(None);
        let generic: Arc<dyn Session> = session.clone();

        let proxy = Proxy::<Arc<dyn Arithmetic>>::bind(&generic, Duration::from_secs(1)).await;
        assert!(proxy.is_none());
        assert!(session.releases().is_empty());
    }

    #[tokio::test]
    async fn wrong_flavor_returns_the_lease_immediately() {
        let session = RecordingSession::new(Some(RemoteCapability::Arithmetic(Arc::new(NullMath))));
        let generic: Arc<dyn Session> = session.clone();

        let proxy =
            Proxy::<Arc<dyn tether_interface::WallClock>>::bind(&generic, Duration::from_secs(1))
                .await;
        assert!(proxy.is_none());
        assert_eq!(session.releases(), vec![1]);
    }

    #[test]
    fn capability_names_line_up() {
        assert_eq!(<Arc<dyn Arithmetic> as FromCapability>::CAPABILITY, ARITHMETIC);
    }
}
