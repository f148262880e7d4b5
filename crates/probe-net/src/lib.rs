//! probe-net - socket abstraction and protocol probes (C6/C7)
//!
//! [`Socket`] wraps a TCP or Unix stream behind the small read/write/timeout
//! contract the probes need. Each probe in [`probes`] speaks one wire
//! protocol well enough to answer "is this service up", nothing more.

pub mod probes;
mod socket;

pub use socket::Socket;

use thiserror::Error;

/// Error types surfaced by a socket or a protocol probe. A timed-out read
/// or connect surfaces as `Io` (std maps it to `ErrorKind::TimedOut` /
/// `WouldBlock`), so there is no separate timeout variant.
#[derive(Error, Debug)]
pub enum Error {
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer responded, but not in a way the probe understands or
    /// accepts (bad magic, failed auth, content mismatch, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
