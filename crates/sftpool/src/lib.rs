//! # sftpool
//!
//! Bounded connection pool for authenticated SFTP-over-SSH sessions.
//!
//! Establishing an SFTP session is expensive (TCP connect, SSH handshake,
//! authentication, channel negotiation), so the pool caches live connections
//! and reuses them for callers that target the same (host, port, user)
//! identity. See [`pool::SftpPool`] for the public entry point.

pub mod pool;

pub use pool::{
    ChannelId, ConnectConfig, ConnectError, ConnectionKey, PoolError, PoolStats, RemoteChannel,
    SessionFactory, SftpPool,
};
