// ── SftpPool – public facade ─────────────────────────────────────────────────

use crate::pool::error::PoolError;
use crate::pool::registry::Registry;
use crate::pool::session::{
    connect_with_retry, RemoteChannel, SessionFactory, Ssh2SessionFactory,
};
use crate::pool::types::{ConnectConfig, PoolStats};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default soft ceiling on live connections.
const DEFAULT_MAX_CONNECTION: usize = 5;

/// Bounded pool of authenticated SFTP connections, keyed by
/// (host, port, user) identity.
///
/// All registry bookkeeping happens under one mutex held only for map and
/// counter updates; session establishment, liveness checks, and physical
/// closes run outside the lock so a slow handshake never blocks other
/// callers.
pub struct SftpPool {
    registry: Mutex<Registry>,
    factory: Arc<dyn SessionFactory>,
}

impl SftpPool {
    /// Pool backed by the `ssh2` session factory.
    pub fn new(max_connection: usize) -> Self {
        Self::with_factory(max_connection, Arc::new(Ssh2SessionFactory))
    }

    /// Pool with a caller-supplied establishment seam (used by the tests).
    pub fn with_factory(max_connection: usize, factory: Arc<dyn SessionFactory>) -> Self {
        SftpPool {
            registry: Mutex::new(Registry::new(max_connection)),
            factory,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Acquire ──────────────────────────────────────────────────────────────

    /// Return a pooled connection for the config's identity, or establish a
    /// fresh one. Pooled connections that fail their liveness check are
    /// dropped silently and replaced; the caller never sees a dead handle.
    pub async fn connect(&self, cfg: &ConnectConfig) -> Result<Arc<dyn RemoteChannel>, PoolError> {
        let key = cfg.key();

        loop {
            // Take the lock only for the bookkeeping; the guard must be gone
            // before the liveness check touches the transport.
            let acquired = self.registry().try_acquire(&key)?;
            let Some(channel) = acquired else { break };

            if channel.is_connected() {
                info!("reusing pooled connection {} for {key}", channel.id());
                return Ok(channel);
            }
            warn!(
                "pooled connection {} for {key} is dead, discarding",
                channel.id()
            );
            self.registry().discard(&channel);
        }

        let channel = connect_with_retry(self.factory.as_ref(), cfg).await?;
        match self.registry().register_new(channel.clone(), key) {
            Ok(()) => Ok(channel),
            Err(e) => {
                // Shutdown raced the establishment; don't leak the session.
                let _ = channel.disconnect();
                Err(e)
            }
        }
    }

    // ── Release ──────────────────────────────────────────────────────────────

    /// Give a connection back. When the live count exceeds the capacity the
    /// connection is physically closed instead of pooled; a retained
    /// connection never produces an error.
    pub async fn disconnect(&self, channel: &Arc<dyn RemoteChannel>) -> Result<(), PoolError> {
        let kept = self.registry().release(channel);
        if kept {
            return Ok(());
        }
        info!(
            "closing connection {} to {} (over capacity or pool shut down)",
            channel.id(),
            channel.endpoint()
        );
        channel.disconnect()
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Close every known connection and disable the pool. Idempotent; a
    /// failing close is logged and does not stop the remaining closes.
    pub async fn shutdown(&self) {
        let Some(outstanding) = self.registry().begin_shutdown() else {
            return;
        };
        info!(
            "shutting down connection pool, closing {} connection(s)",
            outstanding.len()
        );
        for channel in outstanding {
            if let Err(e) = channel.disconnect() {
                error!(
                    "error closing connection {} to {}: {e}",
                    channel.id(),
                    channel.endpoint()
                );
            }
        }
        self.registry().finish_shutdown();
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn max_connection(&self) -> usize {
        self.registry().capacity()
    }

    pub fn set_max_connection(&self, max_connection: usize) {
        self.registry().set_capacity(max_connection);
    }

    /// Connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.registry().idle_count()
    }

    /// Connections currently checked out to callers.
    pub fn live_conn_count(&self) -> usize {
        self.registry().live_count()
    }

    /// Total connections the pool knows about (idle + live).
    pub fn conn_pool_size(&self) -> usize {
        self.registry().total_count()
    }

    /// Consistent snapshot of all counters.
    pub fn stats(&self) -> PoolStats {
        self.registry().stats()
    }
}

impl Default for SftpPool {
    fn default() -> Self {
        SftpPool::new(DEFAULT_MAX_CONNECTION)
    }
}
