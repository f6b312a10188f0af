// ── Connection preflight diagnostics ─────────────────────────────────────────

use sftpool_core::diagnostics::{probe_dns, probe_tcp, DiagnosticReport, ProbeStatus};
use std::time::{Duration, Instant};

/// Probe DNS resolution and TCP reachability for an endpoint before paying
/// for a full SSH handshake. Purely advisory; pool correctness never
/// depends on it.
pub async fn preflight(host: &str, port: u16, timeout: Duration) -> DiagnosticReport {
    let started = Instant::now();
    let mut steps = Vec::new();

    let mut resolved_ip = None;
    if let Some(addr) = probe_dns(host, port, &mut steps) {
        resolved_ip = Some(addr.ip().to_string());
        // The probe stream is dropped immediately; the pool opens its own.
        let _ = probe_tcp(addr, timeout, &mut steps);
    }

    let failed = steps
        .iter()
        .filter(|s| s.status == ProbeStatus::Fail)
        .count();
    let summary = if failed == 0 {
        format!("{host}:{port} is reachable")
    } else {
        format!("{failed} of {} preflight step(s) failed for {host}:{port}", steps.len())
    };

    DiagnosticReport {
        host: host.to_string(),
        port,
        resolved_ip,
        steps,
        summary,
        total_duration_ms: started.elapsed().as_millis() as u64,
    }
}
