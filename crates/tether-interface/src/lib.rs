//! Tether Core Interface: capability contracts for remote peers
//!
//! A *capability* is a named remote interface a peer may or may not expose.
//! This crate defines the trait for each capability the Tether demos consume,
//! the closed catalog (`RemoteCapability`) a session hands out on acquisition,
//! and the shared `CallError` type. It knows nothing about transports or
//! connection management — those live in `tether-link`.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_interface::{Arithmetic, CallError};
//! use std::sync::Arc;
//!
//! async fn example(math: Arc<dyn Arithmetic>) -> Result<(), CallError> {
//!     let sum = math.add(5, 6).await?;
//!     println!("5 + 6 = {sum}");
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a remote capability call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The remote interface cannot be reached right now.
    #[error("remote interface is currently unavailable")]
    Unavailable,

    /// The peer explicitly refused the call.
    #[error("peer rejected the call: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Capability name for [`Arithmetic`].
pub const ARITHMETIC: &str = "Arithmetic";
/// Capability name for [`Dictionary`].
pub const DICTIONARY: &str = "Dictionary";
/// Capability name for [`WallClock`].
pub const WALL_CLOCK: &str = "WallClock";
/// Capability name for [`Controller`].
pub const CONTROLLER: &str = "Controller";

/// Trivial arithmetic service: adds and subtracts 16-bit numbers.
#[async_trait]
pub trait Arithmetic: Send + Sync {
    async fn add(&self, a: u16, b: u16) -> Result<u16>;
    async fn sub(&self, a: u16, b: u16) -> Result<u16>;
}

/// Namespaced key/value storage.
#[async_trait]
pub trait Dictionary: Send + Sync {
    /// Look up `key` under `namespace`. Absence is `Ok(None)`, not an error.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Store `value` under `namespace`/`key`. Returns whether the peer
    /// accepted the write.
    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<bool>;
}

/// Client-supplied sink for remote-originated wallclock callbacks.
///
/// The peer invokes `elapsed` from its own task once an armed countdown
/// fires, so implementations must be safe to call concurrently with
/// whatever the client is doing — including a connection-state transition
/// in flight.
#[async_trait]
pub trait ClockSink: Send + Sync {
    /// Called when the armed countdown has elapsed. The return value is a
    /// re-arm hint: a nonzero value asks the peer to arm again for that
    /// many seconds, zero ends the registration.
    async fn elapsed(&self, seconds: u16) -> u16;
}

/// Wallclock service: current time plus a one-shot countdown callback.
#[async_trait]
pub trait WallClock: Send + Sync {
    /// Current wallclock time, seconds since the Unix epoch.
    async fn now(&self) -> Result<u64>;

    /// Register `sink` to be called back after `seconds`. One-shot unless
    /// the sink's return value asks for a re-arm.
    async fn arm(&self, seconds: u16, sink: Arc<dyn ClockSink>) -> Result<()>;

    /// Unregister `sink`. `Ok(false)` means it was never armed or has
    /// already fired — a normal outcome, not a failure.
    async fn disarm(&self, sink: Arc<dyn ClockSink>) -> Result<bool>;
}

/// Configuration surface of the peer's controller.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Fetch the peer's current configuration line.
    async fn config_line(&self) -> Result<String>;

    /// Substitute the peer's configuration with `config`.
    async fn substitute(&self, config: &str) -> Result<()>;
}

/// The closed catalog of capabilities a session can hand out.
///
/// Acquisition is stringly-keyed on the wire side (a peer exposes
/// capabilities by name) but typed on the client side: a session returns
/// one of these variants and [`FromCapability`] narrows it to the
/// interface the caller asked for.
#[derive(Clone)]
pub enum RemoteCapability {
    Arithmetic(Arc<dyn Arithmetic>),
    Dictionary(Arc<dyn Dictionary>),
    WallClock(Arc<dyn WallClock>),
    Controller(Arc<dyn Controller>),
}

impl RemoteCapability {
    /// The catalog name of this capability.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCapability::Arithmetic(_) => ARITHMETIC,
            RemoteCapability::Dictionary(_) => DICTIONARY,
            RemoteCapability::WallClock(_) => WALL_CLOCK,
            RemoteCapability::Controller(_) => CONTROLLER,
        }
    }
}

impl std::fmt::Debug for RemoteCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteCapability").field(&self.name()).finish()
    }
}

/// Typed view over the capability catalog.
///
/// Implemented for each `Arc<dyn ...>` interface so generic connector code
/// can ask for "the `Arithmetic` flavor of whatever the session returned"
/// without downcast machinery.
pub trait FromCapability: Clone + Send + Sync + 'static {
    /// The catalog name to request from the session.
    const CAPABILITY: &'static str;

    /// Narrow the catalog entry to this interface, if it is the right flavor.
    fn from_capability(capability: RemoteCapability) -> Option<Self>;
}

impl FromCapability for Arc<dyn Arithmetic> {
    const CAPABILITY: &'static str = ARITHMETIC;

    fn from_capability(capability: RemoteCapability) -> Option<Self> {
        match capability {
            RemoteCapability::Arithmetic(iface) => Some(iface),
            _ => None,
        }
    }
}

impl FromCapability for Arc<dyn Dictionary> {
    const CAPABILITY: &'static str = DICTIONARY;

    fn from_capability(capability: RemoteCapability) -> Option<Self> {
        match capability {
            RemoteCapability::Dictionary(iface) => Some(iface),
            _ => None,
        }
    }
}

impl FromCapability for Arc<dyn WallClock> {
    const CAPABILITY: &'static str = WALL_CLOCK;

    fn from_capability(capability: RemoteCapability) -> Option<Self> {
        match capability {
            RemoteCapability::WallClock(iface) => Some(iface),
            _ => None,
        }
    }
}

impl FromCapability for Arc<dyn Controller> {
    const CAPABILITY: &'static str = CONTROLLER;

    fn from_capability(capability: RemoteCapability) -> Option<Self> {
        match capability {
            RemoteCapability::Controller(iface) => Some(iface),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMath;

    #[async_trait]
    impl Arithmetic for FixedMath {
        async fn add(&self, a: u16, b: u16) -> Result<u16> {
            Ok(a.wrapping_add(b))
        }

        async fn sub(&self, a: u16, b: u16) -> Result<u16> {
            Ok(a.wrapping_sub(b))
        }
    }

    #[test]
    fn test_capability_names() {
        let cap = RemoteCapability::Arithmetic(Arc::new(FixedMath));
        assert_eq!(cap.name(), ARITHMETIC);
        assert_eq!(<Arc<dyn Arithmetic> as FromCapability>::CAPABILITY, ARITHMETIC);
    }

    #[test]
    fn test_from_capability_narrows_flavor() {
        let cap = RemoteCapability::Arithmetic(Arc::new(FixedMath));

        assert!(<Arc<dyn Arithmetic> as FromCapability>::from_capability(cap.clone()).is_some());
        assert!(<Arc<dyn Dictionary> as FromCapability>::from_capability(cap).is_none());
    }

    #[tokio::test]
    async fn test_arithmetic_trait_object() {
        let math: Arc<dyn Arithmetic> = Arc::new(FixedMath);
        assert_eq!(math.add(5, 6).await.unwrap(), 11);
        assert_eq!(math.sub(6, 5).await.unwrap(), 1);
    }
}
