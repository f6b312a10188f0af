//! # sftpool-core
//!
//! Shared infrastructure for the sftpool workspace: connection-diagnostics
//! types and probe helpers reused by higher-level crates.

pub mod diagnostics;

pub use diagnostics::{DiagnosticReport, DiagnosticStep, ProbeStatus};
