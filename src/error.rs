//! Error types for the listener lifecycle.
//!
//! Startup failures (`BindError`) are fatal and end the process. Failures while
//! serving (`ServeError`) and while stopping (`ShutdownError`) are reported to
//! whoever drove that phase. Per-connection transport failures never appear
//! here: the HTTP layer closes or rejects the offending connection and the
//! rest of the service carries on.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// The listening socket could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Invalid bind address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: &'static str },

    #[error("Address {0} is already in use")]
    AddressInUse(SocketAddr),

    #[error("Permission denied binding {0}")]
    PermissionDenied(SocketAddr),

    #[error("Failed to bind {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    /// Classify an I/O failure from `bind`/`listen` on `addr`.
    pub(crate) fn from_io(addr: SocketAddr, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse(addr),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(addr),
            io::ErrorKind::AddrNotAvailable => BindError::InvalidAddress {
                addr: addr.to_string(),
                reason: "address is not available on this host",
            },
            _ => BindError::Io { addr, source: err },
        }
    }
}

/// The accept loop could not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Server is already serving")]
    AlreadyServing,

    #[error("Accept loop failed: {0}")]
    Io(#[from] io::Error),
}

/// The listening socket was not released cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Server did not stop within {0:?}")]
    Timeout(Duration),

    #[error("Accept loop ended with an error: {0}")]
    Serve(String),
}
