//! Run report sink
//!
//! Per leaf, the orchestrator reports queued, then exactly one of passed
//! or failed; killed leaves get no record. Captured output is appended to
//! a streamed run log with line endings normalized.

use chrono::{DateTime, Utc};
use colored::Colorize;
use std::time::Duration;

/// Receiver for incremental run results.
pub trait RunReporter {
    fn queued(&mut self, id: &str, label: &str);
    fn passed(&mut self, id: &str, duration: Duration);
    fn failed(&mut self, id: &str, message: &str, duration: Duration);
    /// Append-only run log; `text` is already normalized.
    fn append_output(&mut self, text: &str);
    fn end(&mut self);
}

/// Normalize `\r\n` and bare `\r` line endings to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Totals for one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub started_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// UTC start timestamp for the summary footer.
    pub fn started_label(&self) -> Option<String> {
        self.started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    }
}

/// Console reporter in simx's standard line style.
pub struct ConsoleReporter {
    /// Echo captured simulator output to the terminal.
    pub show_output: bool,
}

impl ConsoleReporter {
    pub fn new(show_output: bool) -> Self {
        Self { show_output }
    }
}

impl RunReporter for ConsoleReporter {
    fn queued(&mut self, _id: &str, label: &str) {
        println!("{} {}", "→".blue(), label);
    }

    fn passed(&mut self, id: &str, duration: Duration) {
        println!(
            "{} {} ({}ms)",
            "✓".green(),
            id,
            duration.as_millis()
        );
    }

    fn failed(&mut self, id: &str, message: &str, duration: Duration) {
        println!(
            "{} {} ({}ms)\n   {}",
            "✗".red(),
            id,
            duration.as_millis(),
            message.red()
        );
    }

    fn append_output(&mut self, text: &str) {
        if self.show_output {
            for line in text.lines() {
                println!("   {}", line.dimmed());
            }
        }
    }

    fn end(&mut self) {}
}

/// Print the closing summary line for a run.
pub fn print_summary(summary: &RunSummary) {
    println!("{}", "─".repeat(50).dimmed());

    if let Some(started) = summary.started_label() {
        println!("{}", format!("Run started {}", started).dimmed());
    }

    if summary.total() == 0 {
        println!("{}", "No tests were run".dimmed());
    } else if summary.all_passed() {
        println!(
            "{} All {} test(s) passed ({}ms)",
            "✓".green().bold(),
            summary.total(),
            summary.duration_ms
        );
    } else {
        println!(
            "{} {}/{} test(s) failed ({}ms)",
            "✗".red().bold(),
            summary.failed,
            summary.total(),
            summary.duration_ms
        );
    }
}
