// ── Types ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_port() -> u16 {
    22
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_keepalive_secs() -> u64 {
    60
}

// ── Connection identity ──────────────────────────────────────────────────────

/// Minimal identity that distinguishes between pooled connections.
///
/// Host and user are compared case-insensitively (canonicalised to lower case
/// at construction). `port: None` means "don't discriminate by port": the
/// port participates in equality only when both sides carry one, so the hash
/// must cover host and user only.
#[derive(Debug, Clone)]
pub struct ConnectionKey {
    host: String,
    port: Option<u16>,
    user: String,
}

impl ConnectionKey {
    pub fn new(host: &str, port: impl Into<Option<u16>>, user: &str) -> Self {
        ConnectionKey {
            host: host.to_ascii_lowercase(),
            port: port.into(),
            user: user.to_ascii_lowercase(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl PartialEq for ConnectionKey {
    fn eq(&self, other: &Self) -> bool {
        let port_matches = match (self.port, other.port) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.host == other.host && self.user == other.user && port_matches
    }
}

impl Eq for ConnectionKey {}

impl Hash for ConnectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.user.hash(state);
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}@{}:{}", self.user, self.host, port),
            None => write!(f, "{}@{}", self.user, self.host),
        }
    }
}

// ── Connection configuration ─────────────────────────────────────────────────

/// Everything needed to establish one authenticated SFTP session.
///
/// `private_key_path` and `private_key_data` are mutually exclusive key
/// sources; supplying both is rejected at establishment time. An empty
/// `username` defaults to the invoking principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_data: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default)]
    pub compress: bool,
    /// Free-form session options; recognised keys override the typed fields.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ConnectConfig {
    pub fn new(host: &str, port: u16, username: &str) -> Self {
        ConnectConfig {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: None,
            private_key_path: None,
            private_key_data: None,
            private_key_passphrase: None,
            timeout_secs: default_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
            compress: false,
            options: HashMap::new(),
        }
    }

    /// The pool identity this configuration maps to. Derived from the
    /// username as supplied, before any principal defaulting.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(&self.host, self.port, &self.username)
    }

    /// Effective compression setting: the `compress` option key, when
    /// present, overrides the typed field.
    pub fn effective_compress(&self) -> bool {
        match self.options.get("compress") {
            Some(v) => v.eq_ignore_ascii_case("true"),
            None => self.compress,
        }
    }

    /// Effective keepalive interval in seconds (0 disables keepalive).
    pub fn effective_keepalive_secs(&self) -> u64 {
        self.options
            .get("keepaliveIntervalSecs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.keepalive_interval_secs)
    }
}

// ── Pool statistics ──────────────────────────────────────────────────────────

/// Consistent snapshot of the pool counters, read under the registry lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub idle: usize,
    pub live: usize,
    pub total: usize,
    pub capacity: usize,
    pub shut_down: bool,
}
