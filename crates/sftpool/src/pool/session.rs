// ── Session establishment and the transport seam ─────────────────────────────

use crate::pool::error::ConnectError;
use crate::pool::error::PoolError;
use crate::pool::types::ConnectConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use ssh2::Session;
use std::any::Any;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Error-message token produced by the transient host-key verification race
/// under concurrent handshakes. Matched case-insensitively, and only here at
/// the transport boundary; everything downstream matches the
/// [`ConnectError::HandshakeRace`] variant.
const HANDSHAKE_RACE_TOKEN: &str = "verify: false";

/// Additional attempts allowed when establishment fails with the handshake
/// race (four attempts total).
const HANDSHAKE_RACE_RETRIES: usize = 3;

// ── Pool-visible connection surface ──────────────────────────────────────────

/// One authenticated SFTP channel over one SSH session.
///
/// The pool never inspects the connection beyond this surface: identity,
/// liveness, and physical close.
pub trait RemoteChannel: Send + Sync + std::fmt::Debug {
    /// Stable id for log correlation.
    fn id(&self) -> Uuid;

    /// Human-readable `user@host:port` for log messages.
    fn endpoint(&self) -> String;

    /// Liveness check. May perform transport I/O; never call under the
    /// registry lock.
    fn is_connected(&self) -> bool;

    /// Physically close the channel and its underlying session.
    fn disconnect(&self) -> Result<(), PoolError>;

    /// Escape hatch for callers that need the concrete transport handle.
    fn as_any(&self) -> &dyn Any;
}

/// Pointer identity of a pooled channel, used as the reverse-index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn of(channel: &Arc<dyn RemoteChannel>) -> Self {
        ChannelId(Arc::as_ptr(channel) as *const () as usize)
    }
}

// ── Establishment seam ───────────────────────────────────────────────────────

/// Performs a single session-establishment attempt.
///
/// Implementations must tear down any partially-established session before
/// returning an error, and must classify the transient host-key race as
/// [`ConnectError::HandshakeRace`]. Registration with the pool registry is
/// the caller's job, never the factory's.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn establish(&self, cfg: &ConnectConfig) -> Result<Arc<dyn RemoteChannel>, ConnectError>;
}

/// Drive a [`SessionFactory`] with the bounded retry policy: up to three
/// additional attempts, only for the handshake race. Any other failure, or
/// exhaustion of the budget, propagates as-is.
pub(crate) async fn connect_with_retry(
    factory: &dyn SessionFactory,
    cfg: &ConnectConfig,
) -> Result<Arc<dyn RemoteChannel>, ConnectError> {
    let mut attempt = 1;
    loop {
        match factory.establish(cfg).await {
            Ok(channel) => return Ok(channel),
            Err(ConnectError::HandshakeRace(msg)) if attempt <= HANDSHAKE_RACE_RETRIES => {
                info!(
                    "host-key verification race connecting to {}:{} (attempt {}), retrying: {}",
                    cfg.host, cfg.port, attempt, msg
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── ssh2-backed implementation ───────────────────────────────────────────────

/// Concrete channel handle: an `ssh2::Session` plus the SFTP channel opened
/// on top of it. `ssh2::Session` is `Send` but not `Sync`, so the handles
/// live behind a mutex.
pub struct Ssh2Channel {
    id: Uuid,
    endpoint: String,
    auth_method: String,
    connected_at: DateTime<Utc>,
    inner: Mutex<Ssh2Inner>,
}

struct Ssh2Inner {
    session: Session,
    sftp: ssh2::Sftp,
    #[allow(dead_code)] // held to keep the TCP connection alive
    tcp: TcpStream,
}

impl Ssh2Channel {
    fn lock(&self) -> MutexGuard<'_, Ssh2Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Which authentication method established this session.
    pub fn auth_method(&self) -> &str {
        &self.auth_method
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Run a closure against the SFTP channel for file-transfer operations.
    pub fn with_sftp<R>(&self, f: impl FnOnce(&ssh2::Sftp) -> R) -> R {
        let inner = self.lock();
        f(&inner.sftp)
    }
}

impl std::fmt::Debug for Ssh2Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Channel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RemoteChannel for Ssh2Channel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn is_connected(&self) -> bool {
        self.lock().session.keepalive_send().is_ok()
    }

    fn disconnect(&self) -> Result<(), PoolError> {
        self.lock()
            .session
            .disconnect(None, "client disconnecting", None)
            .map_err(|e| PoolError::Transport(format!("disconnect failed: {e}")))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Establishes SFTP sessions with the `ssh2` crate.
#[derive(Debug, Default)]
pub struct Ssh2SessionFactory;

#[async_trait]
impl SessionFactory for Ssh2SessionFactory {
    async fn establish(&self, cfg: &ConnectConfig) -> Result<Arc<dyn RemoteChannel>, ConnectError> {
        // ssh2 is a blocking API; keep it off the async worker threads.
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || establish_blocking(&cfg))
            .await
            .map_err(|e| ConnectError::Transport(format!("establishment task failed: {e}")))?
    }
}

fn establish_blocking(cfg: &ConnectConfig) -> Result<Arc<dyn RemoteChannel>, ConnectError> {
    let username = resolve_user(&cfg.username);
    let endpoint = format!("{}@{}:{}", username, cfg.host, cfg.port);

    // TCP connection with timeout
    let addr = format!("{}:{}", cfg.host, cfg.port)
        .to_socket_addrs()
        .map_err(|e| transport("address resolution failed", e))?
        .next()
        .ok_or_else(|| ConnectError::Transport(format!("no address for {}", cfg.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(cfg.timeout_secs))
        .map_err(|e| transport("TCP connection failed", e))?;
    tcp.set_nonblocking(false)
        .map_err(|e| transport("failed to set blocking mode", e))?;

    // SSH handshake
    let mut session =
        Session::new().map_err(|e| transport("failed to create SSH session", e))?;

    if cfg.effective_compress() {
        session.set_compress(true);
    }

    session.set_tcp_stream(
        tcp.try_clone()
            .map_err(|e| transport("failed to clone TCP stream", e))?,
    );
    if let Err(e) = session.handshake() {
        // The host-key race surfaces here; classify before propagating.
        return Err(classify_handshake(&e));
    }

    // Authentication
    let auth_method = match authenticate(&session, cfg, &username) {
        Ok(method) => method,
        Err(e) => return Err(abort(&session, e)),
    };
    if !session.authenticated() {
        return Err(abort(
            &session,
            ConnectError::Transport("not authenticated after auth attempt".into()),
        ));
    }

    // Session options
    let keepalive = cfg.effective_keepalive_secs();
    session.set_keepalive(keepalive > 0, keepalive as u32);

    // SFTP channel on top of the session; this is the pooled handle.
    let sftp = match session.sftp() {
        Ok(sftp) => sftp,
        Err(e) => {
            return Err(abort(
                &session,
                transport("failed to open SFTP channel", e),
            ))
        }
    };

    let id = Uuid::new_v4();
    info!("established SFTP session {id} for {endpoint} via {auth_method}");

    Ok(Arc::new(Ssh2Channel {
        id,
        endpoint,
        auth_method,
        connected_at: Utc::now(),
        inner: Mutex::new(Ssh2Inner { session, sftp, tcp }),
    }))
}

// ── Establishment helpers ────────────────────────────────────────────────────

fn transport(context: &str, e: impl std::fmt::Display) -> ConnectError {
    ConnectError::Transport(format!("{context}: {e}"))
}

fn classify_handshake(e: &ssh2::Error) -> ConnectError {
    if e.message().eq_ignore_ascii_case(HANDSHAKE_RACE_TOKEN) {
        ConnectError::HandshakeRace(e.message().to_string())
    } else {
        transport("SSH handshake failed", e)
    }
}

/// Tear down a partially-established session so no resource leaks across
/// retry attempts, then hand the error back.
fn abort(session: &Session, err: ConnectError) -> ConnectError {
    let _ = session.disconnect(None, "connection attempt aborted", None);
    err
}

/// Empty usernames default to the invoking principal.
fn resolve_user(username: &str) -> String {
    if !username.is_empty() {
        return username.to_string();
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}

/// Try authentication methods in order; returns the name of the method that
/// succeeded. Key file and raw key material are mutually exclusive sources.
fn authenticate(
    session: &Session,
    cfg: &ConnectConfig,
    username: &str,
) -> Result<String, ConnectError> {
    if cfg.private_key_path.is_some() && cfg.private_key_data.is_some() {
        return Err(ConnectError::Transport(
            "privateKeyPath and privateKeyData are mutually exclusive".into(),
        ));
    }

    // 1. Private-key data (PEM in memory) — ssh2 only drives key files, so
    //    the material goes through a self-deleting temp file.
    if let Some(ref key_data) = cfg.private_key_data {
        let passphrase = cfg.private_key_passphrase.as_deref();
        let tmp_key = tempfile::NamedTempFile::new()
            .map_err(|e| transport("failed to stage key material", e))?;
        std::fs::write(tmp_key.path(), key_data.as_bytes())
            .map_err(|e| transport("failed to stage key material", e))?;
        session
            .userauth_pubkey_file(username, None, tmp_key.path(), passphrase)
            .map_err(|e| transport("public-key (memory) auth failed", e))?;
        if session.authenticated() {
            return Ok("publickey-memory".to_string());
        }
    }

    // 2. Private-key file
    if let Some(ref key_path) = cfg.private_key_path {
        let passphrase = cfg.private_key_passphrase.as_deref();
        session
            .userauth_pubkey_file(username, None, Path::new(key_path), passphrase)
            .map_err(|e| transport("public-key (file) auth failed", e))?;
        if session.authenticated() {
            return Ok("publickey".to_string());
        }
    }

    // 3. Default key paths (~/.ssh/id_ed25519, id_rsa, …) when no explicit
    //    credential was supplied
    if cfg.password.is_none() && cfg.private_key_path.is_none() && cfg.private_key_data.is_none() {
        if let Some(ssh_dir) = dirs::home_dir().map(|h| h.join(".ssh")) {
            for name in &["id_ed25519", "id_rsa", "id_ecdsa"] {
                let path = ssh_dir.join(name);
                if path.exists()
                    && session
                        .userauth_pubkey_file(username, None, &path, None)
                        .is_ok()
                    && session.authenticated()
                {
                    return Ok(format!("publickey-default({name})"));
                }
            }
        }
    }

    // 4. Password, with keyboard-interactive fallback
    if let Some(ref password) = cfg.password {
        if session.userauth_password(username, password).is_ok() && session.authenticated() {
            return Ok("password".to_string());
        }

        struct PasswordPrompter {
            password: String,
        }

        impl ssh2::KeyboardInteractivePrompt for PasswordPrompter {
            fn prompt(
                &mut self,
                _username: &str,
                _instructions: &str,
                prompts: &[ssh2::Prompt],
            ) -> Vec<String> {
                prompts.iter().map(|_| self.password.clone()).collect()
            }
        }

        let mut prompter = PasswordPrompter {
            password: password.clone(),
        };
        if session
            .userauth_keyboard_interactive(username, &mut prompter)
            .is_ok()
            && session.authenticated()
        {
            return Ok("keyboard-interactive".to_string());
        }

        warn!("password and keyboard-interactive auth both failed for {username}");
    }

    Err(ConnectError::Transport(
        "no authentication method succeeded".into(),
    ))
}
