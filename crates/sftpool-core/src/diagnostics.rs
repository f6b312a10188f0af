//! Shared connection diagnostics infrastructure.
//!
//! Provides reusable step/report types and probe helpers for preflight
//! checks against a remote endpoint. Higher-level crates chain the probes
//! ([`probe_dns`], [`probe_tcp`]) into a [`DiagnosticReport`] before they
//! attempt an expensive protocol handshake.

use log::debug;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

/// Outcome of a single probe step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeStatus {
    Pass,
    Fail,
    Skip,
}

/// Result of a single diagnostic probe step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    pub status: ProbeStatus,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

/// Full diagnostic report for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub resolved_ip: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    /// Wall-clock milliseconds for the entire diagnostic run.
    pub total_duration_ms: u64,
}

impl DiagnosticReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.status != ProbeStatus::Fail)
    }
}

// ─── Probe helpers ──────────────────────────────────────────────────────────

/// Resolve a hostname to all addresses (IPv4+IPv6) and return the first.
/// Pushes a [`DiagnosticStep`] onto `steps`. Returns `None` on failure.
pub fn probe_dns(host: &str, port: u16, steps: &mut Vec<DiagnosticStep>) -> Option<SocketAddr> {
    let addr_str = format!("{host}:{port}");
    let t = Instant::now();
    match addr_str.to_socket_addrs() {
        Ok(addrs) => {
            let all: Vec<SocketAddr> = addrs.collect();
            let Some(first) = all.first().copied() else {
                steps.push(DiagnosticStep {
                    name: "DNS Resolution".into(),
                    status: ProbeStatus::Fail,
                    message: format!("DNS returned no addresses for {host}"),
                    duration_ms: t.elapsed().as_millis() as u64,
                    detail: Some("Verify the hostname is correct and DNS is configured".into()),
                });
                return None;
            };
            let detail = if all.len() > 1 {
                let ips: Vec<String> = all.iter().map(|a| a.ip().to_string()).collect();
                Some(format!("All resolved addresses: {}", ips.join(", ")))
            } else {
                None
            };
            steps.push(DiagnosticStep {
                name: "DNS Resolution".into(),
                status: ProbeStatus::Pass,
                message: format!("{host} resolved to {}", first.ip()),
                duration_ms: t.elapsed().as_millis() as u64,
                detail,
            });
            Some(first)
        }
        Err(e) => {
            debug!("DNS lookup for {addr_str} failed: {e}");
            steps.push(DiagnosticStep {
                name: "DNS Resolution".into(),
                status: ProbeStatus::Fail,
                message: format!("DNS lookup failed: {e}"),
                duration_ms: t.elapsed().as_millis() as u64,
                detail: Some("Check hostname spelling, DNS server, and network connectivity".into()),
            });
            None
        }
    }
}

/// Attempt a TCP connect with timeout. Pushes a [`DiagnosticStep`].
/// Returns the connected `TcpStream` on success so callers can reuse it.
pub fn probe_tcp(
    addr: SocketAddr,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<TcpStream> {
    let t = Instant::now();
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            steps.push(DiagnosticStep {
                name: "TCP Connect".into(),
                status: ProbeStatus::Pass,
                message: format!("Connected to {addr}"),
                duration_ms: t.elapsed().as_millis() as u64,
                detail: None,
            });
            Some(stream)
        }
        Err(e) => {
            debug!("TCP connect to {addr} failed: {e}");
            steps.push(DiagnosticStep {
                name: "TCP Connect".into(),
                status: ProbeStatus::Fail,
                message: format!("TCP connect to {addr} failed: {e}"),
                duration_ms: t.elapsed().as_millis() as u64,
                detail: Some("Check firewall rules and that the service is listening".into()),
            });
            None
        }
    }
}
