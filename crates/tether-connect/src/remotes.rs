//! Ready-made links for the stock capability catalog.
//!
//! Each link wraps a [`SmartConnector`] for one capability and degrades to a
//! sentinel when the peer is away: arithmetic and clock reads return
//! `Unavailable`/zero, dictionary reads come back absent. The wallclock link
//! additionally keeps a [`CallbackRegistrar`] in step with the connection so
//! a one-shot callback survives reconnects.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use tether_interface::{Arithmetic, CallError, ClockSink, Dictionary, WallClock};
use tether_link::{Endpoint, LinkError, Transport};

use crate::connector::SmartConnector;
use crate::error::{ArmError, DisarmError};
use crate::registrar::CallbackRegistrar;

/// Remote add and subtract.
pub struct ArithmeticLink {
    connector: SmartConnector<Arc<dyn Arithmetic>>,
}

impl ArithmeticLink {
    pub async fn open(transport: Arc<dyn Transport>, endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            connector: SmartConnector::builder(transport, endpoint).open(timeout).await,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.connector.is_operational()
    }

    pub async fn add(&self, a: u16, b: u16) -> Result<u16, CallError> {
        match self.connector.interface().await {
            Some(math) => math.add(a, b).await,
            None => Err(CallError::Unavailable),
        }
    }

    pub async fn sub(&self, a: u16, b: u16) -> Result<u16, CallError> {
        match self.connector.interface().await {
            Some(math) => math.sub(a, b).await,
            None => Err(CallError::Unavailable),
        }
    }

    pub async fn close(self, timeout: Duration) -> Result<(), LinkError> {
        self.connector.close(timeout).await
    }
}

/// Remote namespaced key-value store. Reads collapse "peer away" and "key
/// absent" into `None`; writes report plain success.
pub struct DictionaryLink {
    connector: SmartConnector<Arc<dyn Dictionary>>,
}

impl DictionaryLink {
    pub async fn open(transport: Arc<dyn Transport>, endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            connector: SmartConnector::builder(transport, endpoint).open(timeout).await,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.connector.is_operational()
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let dict = self.connector.interface().await?;
        match dict.get(namespace, key).await {
            Ok(value) => value,
            Err(error) => {
                debug!(namespace, key, %error, "dictionary get failed");
                None
            }
        }
    }

    pub async fn set(&self, namespace: &str, key: &str, value: &str) -> bool {
        let Some(dict) = self.connector.interface().await else {
            return false;
        };
        match dict.set(namespace, key, value).await {
            Ok(stored) => stored,
            Err(error) => {
                debug!(namespace, key, %error, "dictionary set failed");
                false
            }
        }
    }

    pub async fn close(self, timeout: Duration) -> Result<(), LinkError> {
        self.connector.close(timeout).await
    }
}

/// Automatic arming configuration for [`WallClockLink::open`].
pub struct AutoArm {
    pub seconds: u16,
    pub sink: Arc<dyn ClockSink>,
}

/// Relays peer callbacks to the user sink and clears the registration once
/// the one-shot has fired for good (hint zero means no re-arm).
struct RelaySink {
    registrar: Weak<CallbackRegistrar>,
    user: Arc<dyn ClockSink>,
}

#[async_trait]
impl ClockSink for RelaySink {
    async fn elapsed(&self, seconds: u16) -> u16 {
        let hint = self.user.elapsed(seconds).await;
        if hint == 0 {
            if let Some(registrar) = self.registrar.upgrade() {
                registrar.mark_fired().await;
            }
        }
        hint
    }
}

/// Remote time source with one-shot callbacks tied to the link lifecycle.
pub struct WallClockLink {
    connector: SmartConnector<Arc<dyn WallClock>>,
    registrar: Arc<CallbackRegistrar>,
}

impl WallClockLink {
    /// Open the link. With `auto_arm` set, the callback is re-armed after
    /// every transition to operational and disarmed before each teardown.
    pub async fn open(
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        timeout: Duration,
        auto_arm: Option<AutoArm>,
    ) -> Self {
        let registrar = Arc::new(CallbackRegistrar::new());

        let mut builder = SmartConnector::builder(transport, endpoint);
        if let Some(auto) = auto_arm {
            let arm_registrar = Arc::clone(&registrar);
            let relay: Arc<dyn ClockSink> = Arc::new(RelaySink {
                registrar: Arc::downgrade(&registrar),
                user: auto.sink,
            });
            let seconds = auto.seconds;
            builder = builder.on_available(move |clock: Arc<dyn WallClock>| {
                let registrar = Arc::clone(&arm_registrar);
                let relay = Arc::clone(&relay);
                async move {
                    match registrar.arm(&clock, seconds, relay).await {
                        Ok(()) => debug!(seconds, "wallclock callback armed"),
                        Err(error) => warn!(%error, "could not arm wallclock callback"),
                    }
                }
            });
        }
        let down_registrar = Arc::clone(&registrar);
        builder = builder.on_unavailable(move |clock: Arc<dyn WallClock>| {
            let registrar = Arc::clone(&down_registrar);
            async move {
                // Runs while the outgoing handle is still valid; a missing
                // registration is the normal case here.
                match registrar.disarm(&clock).await {
                    Ok(()) => debug!("wallclock callback disarmed"),
                    Err(DisarmError::NotRegistered) => {}
                    Err(DisarmError::Rejected(reason)) => {
                        warn!(%reason, "disarm rejected during teardown");
                    }
                }
            }
        });

        Self {
            connector: builder.open(timeout).await,
            registrar,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.connector.is_operational()
    }

    pub async fn is_armed(&self) -> bool {
        self.registrar.is_armed().await
    }

    /// Current peer time, or `0` while the clock is unreachable.
    pub async fn now(&self) -> u64 {
        match self.connector.interface().await {
            Some(clock) => clock.now().await.unwrap_or(0),
            None => 0,
        }
    }

    /// Arm a one-shot callback by hand.
    pub async fn arm(&self, seconds: u16, sink: Arc<dyn ClockSink>) -> Result<(), ArmError> {
        let Some(clock) = self.connector.interface().await else {
            return Err(ArmError::Unavailable);
        };
        let relay: Arc<dyn ClockSink> = Arc::new(RelaySink {
            registrar: Arc::downgrade(&self.registrar),
            user: sink,
        });
        self.registrar.arm(&clock, seconds, relay).await
    }

    /// Disarm whatever is armed. With the clock unreachable the registration
    /// is already gone, so this never touches a released proxy.
    pub async fn disarm(&self) -> Result<(), DisarmError> {
        let Some(clock) = self.connector.interface().await else {
            return Err(DisarmError::NotRegistered);
        };
        self.registrar.disarm(&clock).await
    }

    pub async fn close(self, timeout: Duration) -> Result<(), LinkError> {
        self.connector.close(timeout).await
    }
}
