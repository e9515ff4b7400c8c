//! simx - HDL simulation test explorer
//!
//! A library for discovering and running dbt-built HDL test cases:
//! - Test discovery by parsing `dbt build` output into a hierarchical tree
//! - Composite colon-delimited test identifiers
//! - Sequential test execution as managed simulator subprocesses
//! - Cooperative cancellation through a process registry
//! - Watch mode with automatic re-discovery

pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod process;
pub mod report;
pub mod runner;
pub mod test_id;
pub mod test_model;
pub mod watcher;

pub use config::Config;
pub use discovery::{DiscoveryEngine, DiscoveryOutcome, SkipReason};
pub use report::{ConsoleReporter, RunReporter, RunSummary};
pub use runner::{RunRequest, TestRunner};
pub use test_id::TestId;
pub use test_model::{TestInfo, TestNode, TestTree};
