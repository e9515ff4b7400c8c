//! Diagnostics extraction boundary
//!
//! The orchestrator hands every captured output blob, pass or fail, to a
//! diagnostics sink. The default sink scans for compiler/simulator-style
//! `severity ... file:line[:col]: message` records so the host surface
//! can annotate source files.

use regex::Regex;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One positioned record extracted from raw process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub col: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

/// Boundary interface the run orchestrator calls with every output blob.
pub trait DiagnosticsSink {
    fn publish(&mut self, raw: &str, store: &mut Vec<Diagnostic>);
}

/// Regex-based extractor for message lines such as
/// `ERROR: tb/top.sv:42:7: blocking assignment in always_ff` or
/// `** Warning: rtl/core.sv:10: latch inferred`.
pub struct MessageScanner {
    pattern: Regex,
}

impl Default for MessageScanner {
    fn default() -> Self {
        Self {
            pattern: Regex::new(
                r"(?m)^\s*(?:\*\*\s*)?(?i:(error|warning))[:\s]+(?:\[[^\]]+\]\s*)?(\S+?):(\d+)(?::(\d+))?:?\s+(.*)$",
            )
            .expect("diagnostic pattern"),
        }
    }
}

impl MessageScanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticsSink for MessageScanner {
    fn publish(&mut self, raw: &str, store: &mut Vec<Diagnostic>) {
        for caps in self.pattern.captures_iter(raw) {
            let severity = if caps[1].eq_ignore_ascii_case("error") {
                Severity::Error
            } else {
                Severity::Warning
            };
            let line = match caps[3].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let col = caps.get(4).and_then(|m| m.as_str().parse().ok());
            store.push(Diagnostic {
                file: PathBuf::from(&caps[2]),
                line,
                col,
                severity,
                message: caps[5].trim().to_string(),
            });
        }
    }
}

/// Sink that ignores everything; used when no annotation surface exists.
#[derive(Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn publish(&mut self, _raw: &str, _store: &mut Vec<Diagnostic>) {}
}
