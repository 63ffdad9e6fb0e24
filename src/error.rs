//! Crate-wide fatal error type.
//!
//! Only bind failure at startup is a first-class error surfaced to the
//! caller; everything else (malformed messages, traversal failures,
//! protocol-level errors) is a state update or an outbound reply message,
//! never a [`Result::Err`]. [`crate::peer::Peer::new`] is the sole
//! fallible entry point in this crate and returns this type directly.
use thiserror::Error;

/// A fatal, crate-wide error.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to bind one of the peer's well-known ports.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
