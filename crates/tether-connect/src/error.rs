//! Error types for callback registration and bounded retry.

use thiserror::Error;

/// Failure modes when arming a one-shot callback on the peer.
#[derive(Error, Debug)]
pub enum ArmError {
    /// The remote interface is not reachable right now.
    #[error("wallclock interface is currently unavailable")]
    Unavailable,

    /// A callback is already armed; disarm it before arming another.
    #[error("a callback is already armed")]
    AlreadyArmed,

    /// The peer refused the request.
    #[error("peer rejected the arm request: {0}")]
    Rejected(String),
}

/// Failure modes when disarming a callback.
#[derive(Error, Debug)]
pub enum DisarmError {
    /// Nothing to disarm: never armed, already fired, or the link went down.
    #[error("no callback is registered")]
    NotRegistered,

    /// The peer refused the request.
    #[error("peer rejected the disarm request: {0}")]
    Rejected(String),
}

/// Invalid retry configuration.
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("invalid retry plan: {0}")]
    InvalidPlan(String),
}
