//! Tether Link: client-side connection lifecycle over an opaque transport
//!
//! This crate owns the resilient half of the connector: dialing an
//! [`Endpoint`], supervising the session, and turning connectivity changes
//! into serialized observer notifications. It deliberately knows nothing
//! about wire formats — the [`Transport`]/[`Session`] traits are the seam
//! where a real RPC channel (or the in-process reference peer) plugs in.
//!
//! # Architecture
//!
//! - **Endpoint**: immutable identification of a remote service
//! - **Transport / Session**: the opaque wire seam, with lease-based
//!   capability acquisition
//! - **ConnectionManager**: supervised redial loop and transition delivery

pub mod endpoint;
pub mod error;
pub mod manager;
pub mod transport;

pub use endpoint::{Endpoint, EndpointAddress, EndpointParseError};
pub use error::LinkError;
pub use manager::{ConnectionManager, ConnectionState, Transition};
pub use transport::{CapabilityRef, LeaseId, Session, Transport};
