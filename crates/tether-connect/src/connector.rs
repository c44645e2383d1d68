//! Smart connector: a connection manager that keeps a typed proxy in step
//! with the link.
//!
//! On every transition to operational the connector acquires a fresh
//! [`Proxy`] for its capability; on every transition away it releases the
//! proxy it holds. User hooks run after the proxy slot has been updated and
//! with no lock held, so a hook is free to call back into the peer or into
//! the connector itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_interface::FromCapability;
use tether_link::{ConnectionManager, ConnectionState, Endpoint, LinkError, Transition, Transport};

use crate::proxy::Proxy;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

type Hook<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared<T> {
    proxy: Mutex<Option<Proxy<T>>>,
    acquire_timeout: Duration,
    on_available: Option<Hook<T>>,
    on_unavailable: Option<Hook<T>>,
}

/// Keeps a capability proxy alive for as long as the link is up.
pub struct SmartConnector<T: FromCapability> {
    manager: ConnectionManager,
    shared: Arc<Shared<T>>,
}

/// Configures and opens a [`SmartConnector`].
pub struct SmartConnectorBuilder<T: FromCapability> {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    acquire_timeout: Duration,
    on_available: Option<Hook<T>>,
    on_unavailable: Option<Hook<T>>,
}

impl<T: FromCapability> SmartConnector<T> {
    pub fn builder(transport: Arc<dyn Transport>, endpoint: Endpoint) -> SmartConnectorBuilder<T> {
        SmartConnectorBuilder {
            transport,
            endpoint,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            on_available: None,
            on_unavailable: None,
        }
    }

    /// Whether the underlying link is operational right now. The proxy may
    /// lag by one notification while the observer catches up.
    pub fn is_operational(&self) -> bool {
        self.manager.is_operational()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.manager.endpoint()
    }

    /// A clone of the current interface handle, or `None` while the
    /// capability is unavailable.
    pub async fn interface(&self) -> Option<T> {
        self.shared
            .proxy
            .lock()
            .await
            .as_ref()
            .map(|proxy| proxy.interface().clone())
    }

    /// Close the link and release any proxy still held.
    pub async fn close(self, timeout: Duration) -> Result<(), LinkError> {
        let result = self.manager.close(timeout).await;
        // The down-transition observer normally releases the proxy before
        // close returns; this covers a link torn down mid-notification.
        if let Some(proxy) = self.shared.proxy.lock().await.take() {
            proxy.release();
        }
        result
    }
}

impl<T: FromCapability> SmartConnectorBuilder<T> {
    /// How long a single capability acquisition may take once the link is up.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Hook invoked with a fresh interface handle after each transition to
    /// operational. Runs outside any connector lock.
    pub fn on_available<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_available = Some(Arc::new(move |interface| Box::pin(hook(interface))));
        self
    }

    /// Hook invoked with the outgoing interface handle just before the proxy
    /// is released on a transition away from operational.
    pub fn on_unavailable<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_unavailable = Some(Arc::new(move |interface| Box::pin(hook(interface))));
        self
    }

    /// Open the link. A rejected first dial is logged, not fatal: the
    /// supervisor keeps dialing in the background either way.
    pub async fn open(self, timeout: Duration) -> SmartConnector<T> {
        let shared = Arc::new(Shared {
            proxy: Mutex::new(None),
            acquire_timeout: self.acquire_timeout,
            on_available: self.on_available,
            on_unavailable: self.on_unavailable,
        });

        let mut manager = ConnectionManager::new(self.transport, self.endpoint);
        let observer = Arc::clone(&shared);
        manager.on_state_change(move |transition| track(Arc::clone(&observer), transition));
        if let Err(error) = manager.open(timeout).await {
            warn!(%error, "link not yet operational; dialing continues in the background");
        }

        SmartConnector { manager, shared }
    }
}

/// Observer body: reconcile the proxy slot with the new link state, then run
/// the matching user hook without holding the slot lock.
async fn track<T: FromCapability>(shared: Arc<Shared<T>>, transition: Transition) {
    if transition.operational {
        let Some(session) = transition.session else {
            return;
        };
        let proxy = Proxy::<T>::bind(&session, shared.acquire_timeout).await;
        let interface = proxy.as_ref().map(|proxy| proxy.interface().clone());
        *shared.proxy.lock().await = proxy;
        match (&shared.on_available, interface) {
            (Some(hook), Some(interface)) => hook(interface).await,
            (_, None) => debug!(
                capability = T::CAPABILITY,
                "link operational but the capability is not exposed"
            ),
            _ => {}
        }
    } else {
        let taken = shared.proxy.lock().await.take();
        if let Some(proxy) = taken {
            if let Some(hook) = &shared.on_unavailable {
                hook(proxy.interface().clone()).await;
            }
            proxy.release();
        }
    }
}
