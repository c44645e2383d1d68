//! Tether Loopback: in-process reference peer
//!
//! The transport and wire format are external collaborators as far as the
//! connector is concerned, so this crate supplies the stand-in: a peer
//! that lives inside the client process, implements the `tether-link`
//! transport seam, and hosts the reference capability set (arithmetic,
//! dictionary, wallclock, controller).
//!
//! The peer is controllable — it can be stopped and restarted, individual
//! capabilities can be hidden, and it accounts for every capability lease
//! — which is exactly what the CLI demos and the connector's lifecycle
//! tests need.

mod peer;
mod services;

pub use peer::LoopbackPeer;
