//! Library level constants.

/// Size of a single transfer block. Each block is sent over its own TCP
/// connection; within a block, packets are sequential on that connection.
pub const BLOCK_BYTES: u64 = 32 * 1024 * 1024;

/// Maximum size of a single `PAKG` data chunk.
pub const PACKET_BYTES: usize = 32 * 1024;

/// Default TCP port shared by both peers.
pub const DEFAULT_PORT: u16 = 25795;

/// Default share folder, relative to the process's working directory.
pub const DEFAULT_SHARE: &str = "./share";

/// Default scanner poll interval, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Number of worker connections each pool starts with before the CONT
/// handshake negotiates the peer's actual count.
pub const DEFAULT_INIT_SOCK_NUM: u32 = 1;

/// Default value this endpoint announces in its own `CONT` messages --
/// how many worker connections it intends to use towards the peer.
pub const DEFAULT_SOCK_NUM: u32 = 4;

/// Initial connect-retry backoff.
pub const CONNECT_BACKOFF_INITIAL_MS: u64 = 50;

/// Connect-retry backoff ceiling.
pub const CONNECT_BACKOFF_MAX_MS: u64 = 5_000;
