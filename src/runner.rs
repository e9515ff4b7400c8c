//! Run orchestrator
//!
//! Expands a selection of tree nodes down to leaf test cases with a work
//! stack, synthesizes one simulator command per leaf, executes leaves
//! strictly sequentially (the simulator license is a scarce, serial
//! resource), and classifies results from captured output. Cancellation
//! is cooperative and checked at stack-pop granularity; a leaf running
//! when the signal fires is killed through the process registry.

use anyhow::{bail, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::process::{exec_test, ExecOutcome, ProcessRegistry};
use crate::report::{normalize_line_endings, RunReporter, RunSummary};
use crate::test_id::TestId;
use crate::test_model::{TestNode, TestTree};

/// One run request from the host surface.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Ids of the nodes to run; `None` means all top-level nodes.
    pub include: Option<Vec<String>>,
    /// Ids skipped entirely, children included.
    pub exclude: HashSet<String>,
    /// Debug runs use the tool's `run` verb instead of `test`.
    pub debug: bool,
}

/// Per-leaf runtime argument string, selected by id kind. The verbosity
/// flag is always included.
pub fn runtime_args(id: &TestId, verbosity: &str) -> String {
    let specific = match id {
        TestId::Simulation { .. } => String::new(),
        TestId::Params { value, .. } => format!("-params={}", value),
        TestId::GeneratorCase { case, .. } => format!("-testcases={}", case),
        TestId::ParamGeneratorCase { param, case, .. } => {
            format!("-params={} -testcases={}", param, case)
        }
        TestId::BenchCase { case, .. } => format!("+testcases={}", case),
        TestId::ParamBenchCase { param, case, .. } => {
            format!("-params={} +testcases={}", param, case)
        }
    };

    if specific.is_empty() {
        format!("-verbosity={}", verbosity)
    } else {
        format!("-verbosity={} {}", verbosity, specific)
    }
}

/// Full command line for one leaf.
pub fn synthesize_command(config: &Config, id: &TestId, debug: bool) -> String {
    let verb = if debug { "run" } else { "test" };
    format!(
        "{} {} {} {} : {}",
        config.tool,
        verb,
        id.target(),
        config.global_args(),
        runtime_args(id, &config.verbosity)
    )
}

static HEADLINE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)errors:\s*\d+\s*,\s*warnings:\s*\d+").expect("headline pattern")
});

/// Failure headline: the last `errors: N, warnings: N` marker in the
/// output, or the whole output when no marker exists.
pub fn failure_headline(output: &str) -> String {
    HEADLINE_MARKER
        .find_iter(output)
        .last()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| output.to_string())
}

/// Sequential test runner; one invocation owns the process registry at a
/// time.
pub struct TestRunner<'a> {
    config: &'a Config,
    base_dir: &'a Path,
    registry: ProcessRegistry,
}

impl<'a> TestRunner<'a> {
    pub fn new(config: &'a Config, base_dir: &'a Path) -> Self {
        Self {
            config,
            base_dir,
            registry: ProcessRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Run the requested selection against `tree`, reporting per leaf.
    /// Exclusive access keeps the registry owned by one run at a time.
    pub async fn run(
        &mut self,
        tree: &TestTree,
        request: &RunRequest,
        cancel: &CancellationToken,
        reporter: &mut dyn RunReporter,
        sink: &mut dyn DiagnosticsSink,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<RunSummary> {
        let run_start = Instant::now();
        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            ..RunSummary::default()
        };

        let mut stack: Vec<&TestNode> = Vec::new();
        match &request.include {
            Some(ids) => {
                for id in ids {
                    match tree.find(id) {
                        Some(node) => stack.push(node),
                        None => bail!("Test '{}' not found in the discovered tree", id),
                    }
                }
            }
            None => stack.extend(tree.roots.iter()),
        }

        while let Some(node) = stack.pop() {
            let id = node.id.to_string();

            // The queue keeps draining under cancellation; an already
            // running process is killed, un-started nodes get no record.
            if cancel.is_cancelled() {
                self.registry.kill_if_present(&id).await;
                continue;
            }

            if request.exclude.contains(&id) {
                continue;
            }

            if node.is_leaf() {
                self.run_leaf(node, &id, request.debug, cancel, reporter, sink, diagnostics, &mut summary)
                    .await;
            } else {
                stack.extend(node.children.iter());
            }
        }

        summary.duration_ms = run_start.elapsed().as_millis();
        reporter.end();
        Ok(summary)
    }

    /// A launch error (unspawnable command, unreadable pipe) is a failed
    /// test like any nonzero exit; it never aborts the rest of the run.
    #[allow(clippy::too_many_arguments)]
    async fn run_leaf(
        &self,
        node: &TestNode,
        id: &str,
        debug: bool,
        cancel: &CancellationToken,
        reporter: &mut dyn RunReporter,
        sink: &mut dyn DiagnosticsSink,
        diagnostics: &mut Vec<Diagnostic>,
        summary: &mut RunSummary,
    ) {
        let cmd = synthesize_command(self.config, &node.id, debug);
        reporter.queued(id, &node.label);

        let start = Instant::now();
        let outcome = exec_test(&self.registry, id, &cmd, self.base_dir, cancel).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(ExecOutcome::Passed(output)) => {
                reporter.passed(id, elapsed);
                sink.publish(&output, diagnostics);
                reporter.append_output(&normalize_line_endings(&output));
                summary.passed += 1;
            }
            Ok(ExecOutcome::Failed(output)) => {
                reporter.failed(id, &failure_headline(&output), elapsed);
                sink.publish(&output, diagnostics);
                reporter.append_output(&normalize_line_endings(&output));
                summary.failed += 1;
            }
            // Killed by cancellation: no pass/fail record.
            Ok(ExecOutcome::Terminated) => {}
            Err(e) => {
                reporter.failed(id, &format!("{:#}", e), elapsed);
                summary.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullSink;
    use crate::report::testing::{CollectingReporter, Recorded};

    fn config(tool: &str) -> Config {
        toml::from_str(&format!(
            r#"
target = "chip"
tool = {:?}
verbosity = "high"
backend_flags = ["xsim-wdb=waves.wdb"]
"#,
            tool
        ))
        .unwrap()
    }

    fn leaf(id: TestId, label: &str) -> TestNode {
        TestNode::new(id, label)
    }

    fn sample_tree() -> TestTree {
        // chip
        // ├── 8
        // │   ├── smoke
        // │   └── full
        // └── 16
        //     ├── smoke
        //     └── full
        let mut sim = leaf(
            TestId::Simulation {
                target: "chip".into(),
            },
            "core/chip",
        );
        for param in ["8", "16"] {
            let mut p = leaf(
                TestId::Params {
                    value: param.into(),
                    target: "chip".into(),
                },
                param,
            );
            for case in ["smoke", "full"] {
                p.children.push(leaf(
                    TestId::ParamGeneratorCase {
                        target: "chip".into(),
                        param: param.into(),
                        case: case.into(),
                    },
                    case,
                ));
            }
            sim.children.push(p);
        }
        TestTree { roots: vec![sim] }
    }

    async fn run_tree(
        tree: &TestTree,
        cfg: &Config,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> (RunSummary, CollectingReporter) {
        let base = std::env::temp_dir();
        let mut runner = TestRunner::new(cfg, &base);
        let mut reporter = CollectingReporter::default();
        let mut diagnostics = Vec::new();
        let summary = runner
            .run(
                tree,
                request,
                cancel,
                &mut reporter,
                &mut NullSink,
                &mut diagnostics,
            )
            .await
            .unwrap();
        assert!(runner.registry().is_empty());
        (summary, reporter)
    }

    #[test]
    fn test_runtime_args_per_kind() {
        let cases = [
            ("simulation:chip", "-verbosity=high"),
            ("params:8:chip", "-verbosity=high -params=8"),
            ("testCaseGenerator:chip:smoke", "-verbosity=high -testcases=smoke"),
            (
                "paramsTestCaseGenerator:chip:8:smoke",
                "-verbosity=high -params=8 -testcases=smoke",
            ),
            ("testBench:chip:basic", "-verbosity=high +testcases=basic"),
            (
                "paramsTestBench:chip:8:basic",
                "-verbosity=high -params=8 +testcases=basic",
            ),
        ];
        for (id, expected) in cases {
            let id = TestId::parse(id).unwrap();
            assert_eq!(runtime_args(&id, "high"), expected);
        }
    }

    #[test]
    fn test_synthesize_command_shape() {
        let cfg = config("dbt");
        let id = TestId::parse("paramsTestBench:chip:8:basic").unwrap();
        assert_eq!(
            synthesize_command(&cfg, &id, false),
            "dbt test chip hdl-simulator=xsim xsim-wdb=waves.wdb : -verbosity=high -params=8 +testcases=basic"
        );
        assert_eq!(
            synthesize_command(&cfg, &id, true),
            "dbt run chip hdl-simulator=xsim xsim-wdb=waves.wdb : -verbosity=high -params=8 +testcases=basic"
        );
    }

    #[test]
    fn test_failure_headline_takes_last_marker() {
        let output = "compiling\nerrors: 2, warnings: 1\nrerun\nerrors: 0, warnings: 0\n";
        assert_eq!(failure_headline(output), "errors: 0, warnings: 0");
    }

    #[test]
    fn test_failure_headline_falls_back_to_full_output() {
        let output = "segfault in simulator\n";
        assert_eq!(failure_headline(output), output);
    }

    #[tokio::test]
    async fn test_run_all_leaves_pass() {
        let tree = sample_tree();
        let cfg = config("echo ok; exit 0 #");
        let (summary, reporter) =
            run_tree(&tree, &cfg, &RunRequest::default(), &CancellationToken::new()).await;

        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(reporter.result_count(), 4);
        assert!(summary.started_at.is_some());
        assert_eq!(reporter.events.last(), Some(&Recorded::End));
    }

    #[tokio::test]
    async fn test_launch_error_fails_leaf_and_run_continues() {
        // Both leaves fail to spawn (missing working directory); each one
        // still gets a failed record and the report is closed.
        let tree = TestTree {
            roots: vec![
                leaf(
                    TestId::GeneratorCase {
                        target: "chip".into(),
                        case: "a".into(),
                    },
                    "a",
                ),
                leaf(
                    TestId::GeneratorCase {
                        target: "chip".into(),
                        case: "b".into(),
                    },
                    "b",
                ),
            ],
        };
        let cfg = config("exit 0 #");
        let mut runner = TestRunner::new(&cfg, Path::new("/nonexistent_simx_run_dir"));
        let mut reporter = CollectingReporter::default();
        let mut diagnostics = Vec::new();
        let summary = runner
            .run(
                &tree,
                &RunRequest::default(),
                &CancellationToken::new(),
                &mut reporter,
                &mut NullSink,
                &mut diagnostics,
            )
            .await
            .unwrap();

        assert_eq!(summary.failed, 2);
        let fails = reporter.fail_records();
        assert_eq!(fails.len(), 2);
        assert!(fails.iter().all(|(_, msg)| msg.contains("Failed to spawn")));
        assert_eq!(reporter.events.last(), Some(&Recorded::End));
        assert!(runner.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_leaf_reports_last_marker_headline() {
        let tree = TestTree {
            roots: vec![leaf(
                TestId::BenchCase {
                    target: "chip".into(),
                    case: "basic".into(),
                },
                "basic",
            )],
        };
        let cfg = config("echo 'errors: 2, warnings: 1'; echo 'errors: 0, warnings: 0'; exit 1 #");
        let (summary, reporter) =
            run_tree(&tree, &cfg, &RunRequest::default(), &CancellationToken::new()).await;

        assert_eq!(summary.failed, 1);
        let fails = reporter.fail_records();
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].1, "errors: 0, warnings: 0");
    }

    #[tokio::test]
    async fn test_exclusion_prunes_whole_subtree() {
        let tree = sample_tree();
        let cfg = config("exit 0 #");
        let request = RunRequest {
            exclude: ["params:8:chip".to_string()].into_iter().collect(),
            ..RunRequest::default()
        };
        let (summary, reporter) =
            run_tree(&tree, &cfg, &request, &CancellationToken::new()).await;

        assert_eq!(summary.passed, 2);
        for id in reporter.pass_ids() {
            assert!(id.contains(":16:"), "leaf {} reachable only via excluded node", id);
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_yields_no_records() {
        let tree = sample_tree();
        let cfg = config("exit 0 #");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (summary, reporter) = run_tree(&tree, &cfg, &RunRequest::default(), &cancel).await;

        assert_eq!(summary.total(), 0);
        assert_eq!(reporter.result_count(), 0);
    }

    #[tokio::test]
    async fn test_stack_order_is_most_recently_pushed_first() {
        let tree = TestTree {
            roots: vec![
                leaf(
                    TestId::GeneratorCase {
                        target: "chip".into(),
                        case: "a".into(),
                    },
                    "a",
                ),
                leaf(
                    TestId::GeneratorCase {
                        target: "chip".into(),
                        case: "b".into(),
                    },
                    "b",
                ),
            ],
        };
        let cfg = config("exit 0 #");
        let (_, reporter) =
            run_tree(&tree, &cfg, &RunRequest::default(), &CancellationToken::new()).await;

        assert_eq!(
            reporter.pass_ids(),
            vec!["testCaseGenerator:chip:b", "testCaseGenerator:chip:a"]
        );
    }

    #[tokio::test]
    async fn test_unknown_include_id_is_an_error() {
        let tree = sample_tree();
        let cfg = config("exit 0 #");
        let mut runner = TestRunner::new(&cfg, Path::new("/tmp"));
        let request = RunRequest {
            include: Some(vec!["simulation:nope".to_string()]),
            ..RunRequest::default()
        };
        let mut reporter = CollectingReporter::default();
        let mut diagnostics = Vec::new();
        let err = runner
            .run(
                &tree,
                &request,
                &CancellationToken::new(),
                &mut reporter,
                &mut NullSink,
                &mut diagnostics,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_include_subtree_runs_only_its_leaves() {
        let tree = sample_tree();
        let cfg = config("exit 0 #");
        let request = RunRequest {
            include: Some(vec!["params:16:chip".to_string()]),
            ..RunRequest::default()
        };
        let (summary, reporter) =
            run_tree(&tree, &cfg, &request, &CancellationToken::new()).await;

        assert_eq!(summary.passed, 2);
        for id in reporter.pass_ids() {
            assert!(id.starts_with("paramsTestCaseGenerator:chip:16:"));
        }
    }
}
