//! Error types for the tether-link crate

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// The transport could not reach the peer (connect refused, channel
    /// gone, peer offline).
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The operation did not complete within its timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The manager has been closed and cannot serve this request.
    #[error("connection manager is closed")]
    AlreadyClosed,

    /// The peer explicitly refused the request.
    #[error("peer rejected the request: {0}")]
    Rejected(String),
}
