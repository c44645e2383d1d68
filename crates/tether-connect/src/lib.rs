//! Tether Connect: resilient client-side access to remote capabilities.
//!
//! Builds on [`tether_link`]'s connection manager with three pieces:
//!
//! - [`Proxy`]: a typed, lease-backed capability handle that releases
//!   exactly once, enforced by move semantics.
//! - [`SmartConnector`]: keeps a proxy in step with the link, re-acquiring
//!   after every reconnect and releasing before every teardown.
//! - [`RetryController`]: a bounded dial-probe-commit loop for peers that
//!   come and go.
//!
//! The [`remotes`] module layers ready-made links for the stock capability
//! catalog on top, including wallclock one-shot callbacks managed by a
//! [`CallbackRegistrar`].

mod connector;
mod error;
mod proxy;
mod registrar;
pub mod remotes;
mod retry;

pub use connector::{SmartConnector, SmartConnectorBuilder};
pub use error::{ArmError, DisarmError, RetryError};
pub use proxy::Proxy;
pub use registrar::CallbackRegistrar;
pub use retry::{CommitOutcome, RetryController, RetryPlan, RetryReport};
