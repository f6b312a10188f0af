// ── sftpool / pool module ─────────────────────────────────────────────────────
//
// Bounded SFTP connection pooling:
//   • Identity-keyed reuse of authenticated sessions (host, port, user)
//   • Soft capacity enforcement — releases over the ceiling close instead
//     of pooling
//   • Bounded retry for the known transient host-key verification race
//   • Idempotent shutdown that closes every outstanding connection
//   • Preflight DNS/TCP diagnostics

pub mod diagnostics;
pub mod error;
pub mod registry;
pub mod service;
pub mod session;
pub mod types;

pub use diagnostics::preflight;
pub use error::{ConnectError, PoolError};
pub use service::SftpPool;
pub use session::{ChannelId, RemoteChannel, SessionFactory, Ssh2SessionFactory};
pub use types::{ConnectConfig, ConnectionKey, PoolStats};
