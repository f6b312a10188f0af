// ── Pool registry: the single lock-guarded consistency domain ────────────────

use crate::pool::error::PoolError;
use crate::pool::session::{ChannelId, RemoteChannel};
use crate::pool::types::{ConnectionKey, PoolStats};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Explicit registry lifecycle. Checked at the top of every operation so
/// use-after-teardown fails closed instead of relying on emptied maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    ShuttingDown,
    Shutdown,
}

struct OwnerEntry {
    key: ConnectionKey,
    channel: Arc<dyn RemoteChannel>,
}

/// All shared pool state. Owned by the facade behind one mutex; methods here
/// are pure bookkeeping and never perform transport I/O.
///
/// Invariants:
///   - every id in an `idle` set has an entry in `owners`
///   - `live_count` equals `owners.len()` minus the idle total
///   - idle sets are removed when emptied, so a present-but-empty set is a
///     bookkeeping defect
pub(crate) struct Registry {
    idle: HashMap<ConnectionKey, HashSet<ChannelId>>,
    owners: HashMap<ChannelId, OwnerEntry>,
    live_count: usize,
    capacity: usize,
    lifecycle: Lifecycle,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Registry {
            idle: HashMap::new(),
            owners: HashMap::new(),
            live_count: 0,
            capacity,
            lifecycle: Lifecycle::Active,
        }
    }

    /// Take an arbitrary idle connection for `key`, moving it to live.
    /// `Ok(None)` means no idle connection is available — not an error, the
    /// caller establishes a fresh one.
    pub(crate) fn try_acquire(
        &mut self,
        key: &ConnectionKey,
    ) -> Result<Option<Arc<dyn RemoteChannel>>, PoolError> {
        if self.lifecycle != Lifecycle::Active {
            return Err(PoolError::ShutDown);
        }

        let Some(set) = self.idle.get_mut(key) else {
            return Ok(None);
        };
        let Some(id) = set.iter().next().copied() else {
            return Err(PoolError::Consistency(format!(
                "empty idle set left behind for {key}"
            )));
        };
        set.remove(&id);
        if set.is_empty() {
            self.idle.remove(key);
        }

        let Some(entry) = self.owners.get(&id) else {
            return Err(PoolError::Consistency(format!(
                "idle connection for {key} missing from the reverse index"
            )));
        };
        self.live_count += 1;
        Ok(Some(entry.channel.clone()))
    }

    /// Register a freshly established connection as live. Never called for
    /// connections returned by `try_acquire`, which are already registered.
    pub(crate) fn register_new(
        &mut self,
        channel: Arc<dyn RemoteChannel>,
        key: ConnectionKey,
    ) -> Result<(), PoolError> {
        if self.lifecycle != Lifecycle::Active {
            return Err(PoolError::ShutDown);
        }
        let id = ChannelId::of(&channel);
        self.owners.insert(id, OwnerEntry { key, channel });
        self.live_count += 1;
        Ok(())
    }

    /// Decide whether a released connection is retained. `false` means the
    /// caller must physically close it outside the lock — either the live
    /// count exceeds capacity, or the registry no longer knows the
    /// connection (e.g. a release racing shutdown).
    pub(crate) fn release(&mut self, channel: &Arc<dyn RemoteChannel>) -> bool {
        let id = ChannelId::of(channel);
        if !self.owners.contains_key(&id) {
            return false;
        }
        if self.live_count > self.capacity {
            self.live_count = self.live_count.saturating_sub(1);
            self.owners.remove(&id);
            return false;
        }
        if let Some(entry) = self.owners.get(&id) {
            let key = entry.key.clone();
            self.idle.entry(key).or_default().insert(id);
            self.live_count = self.live_count.saturating_sub(1);
        }
        true
    }

    /// Drop a connection that failed its liveness check at acquire time.
    /// Removal is by the reference actually found; the connection was just
    /// taken from idle, so it only needs to leave the reverse index and the
    /// live accounting.
    pub(crate) fn discard(&mut self, channel: &Arc<dyn RemoteChannel>) {
        let id = ChannelId::of(channel);
        if self.owners.remove(&id).is_some() {
            self.live_count = self.live_count.saturating_sub(1);
        }
    }

    /// First half of shutdown: flip to `ShuttingDown`, zero the capacity so
    /// racing releases choose close over pool, and drain the maps. Returns
    /// the connections to close outside the lock, or `None` when shutdown
    /// already ran (idempotent).
    pub(crate) fn begin_shutdown(&mut self) -> Option<Vec<Arc<dyn RemoteChannel>>> {
        if self.lifecycle != Lifecycle::Active {
            return None;
        }
        self.lifecycle = Lifecycle::ShuttingDown;
        self.capacity = 0;
        self.live_count = 0;
        self.idle.clear();
        let outstanding = self
            .owners
            .drain()
            .map(|(_, entry)| entry.channel)
            .collect();
        Some(outstanding)
    }

    /// Second half of shutdown, after the closes were attempted.
    pub(crate) fn finish_shutdown(&mut self) {
        self.lifecycle = Lifecycle::Shutdown;
    }

    // ── Accessors (all read under the facade's lock) ─────────────────────────

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.values().map(|set| set.len()).sum()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    pub(crate) fn total_count(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle_count(),
            live: self.live_count,
            total: self.owners.len(),
            capacity: self.capacity,
            shut_down: self.lifecycle != Lifecycle::Active,
        }
    }
}
