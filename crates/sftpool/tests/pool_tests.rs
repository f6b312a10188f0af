// ── Pool behaviour tests against a mock transport ────────────────────────────

use async_trait::async_trait;
use sftpool::{
    ConnectConfig, ConnectError, PoolError, RemoteChannel, SessionFactory, SftpPool,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ── Mock transport ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct MockChannel {
    id: Uuid,
    endpoint: String,
    alive: AtomicBool,
    close_attempts: AtomicUsize,
    fail_close: bool,
}

impl MockChannel {
    fn new(endpoint: String, fail_close: bool) -> Arc<Self> {
        Arc::new(MockChannel {
            id: Uuid::new_v4(),
            endpoint,
            alive: AtomicBool::new(true),
            close_attempts: AtomicUsize::new(0),
            fail_close,
        })
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }
}

impl RemoteChannel for MockChannel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn disconnect(&self) -> Result<(), PoolError> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        if self.fail_close {
            Err(PoolError::Transport("simulated close failure".into()))
        } else {
            Ok(())
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripted factory: the first `races` attempts fail with the handshake
/// race; later attempts produce fresh mock channels. Channels whose creation
/// index (zero-based) appears in `fail_close_indices` fail their physical
/// close.
#[derive(Default)]
struct MockFactory {
    races: usize,
    attempts: AtomicUsize,
    fail_close_indices: Vec<usize>,
    created: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockFactory {
    fn new(races: usize) -> Self {
        MockFactory {
            races,
            ..Default::default()
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn created(&self) -> Vec<Arc<MockChannel>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn establish(&self, cfg: &ConnectConfig) -> Result<Arc<dyn RemoteChannel>, ConnectError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.races {
            return Err(ConnectError::HandshakeRace("verify: false".into()));
        }
        let mut created = self.created.lock().unwrap();
        let fail_close = self.fail_close_indices.contains(&created.len());
        let channel = MockChannel::new(
            format!("{}@{}:{}", cfg.username, cfg.host, cfg.port),
            fail_close,
        );
        created.push(channel.clone());
        Ok(channel)
    }
}

fn pool_with(factory: Arc<MockFactory>, capacity: usize) -> SftpPool {
    SftpPool::with_factory(capacity, factory)
}

fn cfg(host: &str, user: &str) -> ConnectConfig {
    ConnectConfig::new(host, 22, user)
}

// ── Reuse ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn released_connection_is_reused() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let first = pool.connect(&cfg("files.example.org", "deploy")).await.unwrap();
    pool.disconnect(&first).await.unwrap();
    let second = pool.connect(&cfg("files.example.org", "deploy")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.attempts(), 1, "reuse must not touch the network");
    assert_eq!(pool.conn_pool_size(), 1);
}

#[tokio::test]
async fn identity_is_case_insensitive() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let first = pool.connect(&cfg("Files.Example.Org", "Deploy")).await.unwrap();
    pool.disconnect(&first).await.unwrap();
    let second = pool.connect(&cfg("files.example.org", "deploy")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.attempts(), 1);
}

#[tokio::test]
async fn distinct_identities_do_not_share_connections() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let first = pool.connect(&cfg("a.example.org", "deploy")).await.unwrap();
    pool.disconnect(&first).await.unwrap();
    let second = pool.connect(&cfg("b.example.org", "deploy")).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.attempts(), 2);
}

// ── Capacity enforcement ─────────────────────────────────────────────────────

#[tokio::test]
async fn release_over_capacity_closes_instead_of_pooling() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 1);

    let first = pool.connect(&cfg("h", "u")).await.unwrap();
    let second = pool.connect(&cfg("h", "u")).await.unwrap();
    assert_eq!(pool.live_conn_count(), 2);
    assert_eq!(pool.conn_pool_size(), 2);

    // live (2) > capacity (1): this release closes
    pool.disconnect(&first).await.unwrap();
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.conn_pool_size(), 1);
    assert_eq!(factory.created()[0].close_attempts(), 1);

    // back at the ceiling: this release pools
    pool.disconnect(&second).await.unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.conn_pool_size(), 1);
    assert_eq!(factory.created()[1].close_attempts(), 0);
}

#[tokio::test]
async fn capacity_can_be_adjusted_at_runtime() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory, 1);
    assert_eq!(pool.max_connection(), 1);
    pool.set_max_connection(8);
    assert_eq!(pool.max_connection(), 8);
}

// ── Dead-connection eviction ─────────────────────────────────────────────────

#[tokio::test]
async fn dead_pooled_connection_is_replaced_transparently() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let first = pool.connect(&cfg("h", "u")).await.unwrap();
    pool.disconnect(&first).await.unwrap();
    factory.created()[0].kill();

    let second = pool.connect(&cfg("h", "u")).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_connected());
    assert_eq!(factory.attempts(), 2);

    // the dead connection left the books entirely
    assert_eq!(pool.conn_pool_size(), 1);
    assert_eq!(pool.live_conn_count(), 1);
    assert_eq!(pool.idle_count(), 0);
}

// ── Bounded retry ────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_retries_through_two_handshake_races() {
    let factory = Arc::new(MockFactory::new(2));
    let pool = pool_with(factory.clone(), 5);

    let channel = pool.connect(&cfg("h", "u")).await.unwrap();
    assert!(channel.is_connected());
    assert_eq!(factory.attempts(), 3);
}

#[tokio::test]
async fn connect_fails_after_four_handshake_races() {
    let factory = Arc::new(MockFactory::new(usize::MAX));
    let pool = pool_with(factory.clone(), 5);

    let err = pool.connect(&cfg("h", "u")).await.unwrap_err();
    assert!(matches!(err, PoolError::Transport(_)));
    assert_eq!(factory.attempts(), 4);
    assert_eq!(pool.conn_pool_size(), 0);
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_is_idempotent_and_clears_the_pool() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let first = pool.connect(&cfg("h", "u")).await.unwrap();
    pool.disconnect(&first).await.unwrap();
    let _second = pool.connect(&cfg("other", "u")).await.unwrap();

    pool.shutdown().await;
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.conn_pool_size(), 0);
    assert_eq!(pool.live_conn_count(), 0);

    // second shutdown is a no-op, not an error
    pool.shutdown().await;
    assert_eq!(pool.conn_pool_size(), 0);
}

#[tokio::test]
async fn shutdown_closes_all_outstanding_even_when_a_close_fails() {
    let factory = Arc::new(MockFactory {
        fail_close_indices: vec![1],
        ..Default::default()
    });
    let pool = pool_with(factory.clone(), 5);

    for host in ["a", "b", "c"] {
        let _ = pool.connect(&cfg(host, "u")).await.unwrap();
    }
    assert_eq!(pool.live_conn_count(), 3);
    assert_eq!(pool.idle_count(), 0);

    pool.shutdown().await;

    let created = factory.created();
    assert_eq!(created.len(), 3);
    for channel in &created {
        assert_eq!(channel.close_attempts(), 1, "every close must be attempted");
    }
    assert_eq!(pool.conn_pool_size(), 0);
}

#[tokio::test]
async fn connect_after_shutdown_fails_closed() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    pool.shutdown().await;
    let err = pool.connect(&cfg("h", "u")).await.unwrap_err();
    assert!(matches!(err, PoolError::ShutDown));
    assert_eq!(factory.attempts(), 0, "no establishment after shutdown");
}

#[tokio::test]
async fn release_after_shutdown_closes_the_connection() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory.clone(), 5);

    let channel = pool.connect(&cfg("h", "u")).await.unwrap();
    pool.shutdown().await;

    // The in-flight handle was already closed by shutdown; releasing it now
    // must converge to "closed, not pooled" without an error from pooling.
    let _ = pool.disconnect(&channel).await;
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.conn_pool_size(), 0);
}

// ── Stats ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_snapshot_tracks_counters() {
    let factory = Arc::new(MockFactory::new(0));
    let pool = pool_with(factory, 3);

    let first = pool.connect(&cfg("h", "u")).await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.capacity, 3);
    assert!(!stats.shut_down);

    pool.disconnect(&first).await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.total, 1);

    pool.shutdown().await;
    assert!(pool.stats().shut_down);
}
