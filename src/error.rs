//! Crate-wide error taxonomy.
//!
//! Startup failures (bad CLI, failed bind) are handled by `.expect()` at
//! the call site -- those are fatal to the process by design. Everything
//! that happens once the pools are running goes through `PeerSyncError`
//! so a worker can log and recover instead of taking the whole endpoint
//! down with it.

use std::io;

/// The reason a connection was judged to be speaking a broken dialect of the
/// wire protocol.
#[derive(Debug)]
pub enum ProtocolViolation {
    /// The 4-byte code field did not match any known `Code`.
    UnknownCode([u8; 4]),
    /// Fewer bytes were available than the format string promised.
    Truncated,
    /// A format character outside the `Id?#$Q` alphabet appeared.
    BadFormatChar(u8),
}

/// Errors that can surface out of the protocol, scanner, sender, receiver or
/// writer during steady-state operation.
#[derive(Debug, thiserror::Error)]
pub enum PeerSyncError {
    /// `connect`/`read`/`write`/`accept` failed. The caller re-queues the
    /// affected work item and opens a fresh socket on retry.
    #[error("transient network error: {0}")]
    TransientNetwork(#[from] io::Error),

    /// The wire format was violated. The connection is closed; the process
    /// keeps running.
    #[error("protocol violation: {0:?}")]
    Protocol(ProtocolViolation),

    /// A local filesystem operation (open/read/write/mkdir) failed.
    #[error("local filesystem error: {0}")]
    LocalFilesystem(io::Error),

    /// A caller tried to pack a value the codec has no encoding for. This is
    /// a programmer error, not a runtime condition.
    #[error("cannot pack value: {0}")]
    Pack(String),

    /// A caller tried to unpack a format string with no matching decode
    /// rule. Also a programmer error.
    #[error("cannot unpack value: {0}")]
    Unpack(String),
}

impl From<ProtocolViolation> for PeerSyncError {
    fn from(v: ProtocolViolation) -> Self {
        PeerSyncError::Protocol(v)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PeerSyncError>;
