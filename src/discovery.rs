//! Test discovery module
//!
//! Discovers HDL test cases by running the build tool in discovery mode
//! and parsing its output line by line into a tree of test nodes. Each
//! matching line starts one simulation node; parameter, generator-case
//! and bench-case matches on the same line attach children before the
//! node is appended, so consumers never observe a half-built node. The
//! published tree is replaced wholesale on every cycle.

use anyhow::{Context, Result};
use colored::Colorize;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::process::exec_shell;
use crate::test_id::TestId;
use crate::test_model::{SourceLocation, TestInfo, TestNode, TestTree};

/// Build-metadata and dependency-lock directories whose file events must
/// not trigger a rebuild.
const EXCLUDED_DIRS: &[&str] = &[".dbt", "dbt-rules", "vendor", ".git"];

const DISCOVERY_ARGS: &str = "build hdl-find-testcases=true hdl-show-testcases-file=true";

/// Why a discovery request did not produce a new tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another discovery cycle is already running; the request is
    /// dropped, not queued.
    InFlight,
    /// The triggering path lies in an excluded directory.
    ExcludedPath,
    /// The build tool exited nonzero; the previous tree is kept.
    BuildFailed,
}

#[derive(Debug)]
pub enum DiscoveryOutcome {
    Published(Arc<TestTree>),
    Skipped(SkipReason),
}

/// Serialized discovery driver holding the published tree snapshot.
pub struct DiscoveryEngine {
    config: Config,
    root_dir: PathBuf,
    in_flight: AtomicBool,
    published: RwLock<Arc<TestTree>>,
}

impl DiscoveryEngine {
    pub fn new(config: Config, root_dir: PathBuf) -> Self {
        Self {
            config,
            root_dir,
            in_flight: AtomicBool::new(false),
            published: RwLock::new(Arc::new(TestTree::default())),
        }
    }

    /// The most recently published tree.
    pub fn tree(&self) -> Arc<TestTree> {
        self.published.read().expect("published tree poisoned").clone()
    }

    /// Run one discovery cycle. `trigger` is the file path that caused
    /// the request, if any; it is consulted only for the exclusion guard.
    pub async fn discover(&self, trigger: Option<&Path>) -> Result<DiscoveryOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(DiscoveryOutcome::Skipped(SkipReason::InFlight));
        }
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(path) = trigger {
            if is_excluded_path(path) {
                return Ok(DiscoveryOutcome::Skipped(SkipReason::ExcludedPath));
            }
        }

        let cmd = format!("{} {}", self.config.tool, DISCOVERY_ARGS);
        let output = exec_shell(&cmd, &self.root_dir).await?;
        if !output.success {
            println!(
                "{}",
                "discovery build failed, keeping previous test tree".dimmed()
            );
            return Ok(DiscoveryOutcome::Skipped(SkipReason::BuildFailed));
        }

        let tree = parse_build_output(&output.stdout, &self.config.target, &self.root_dir).await?;
        let tree = Arc::new(tree);
        *self.published.write().expect("published tree poisoned") = tree.clone();

        Ok(DiscoveryOutcome::Published(tree))
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Whether `path` lies under a build-metadata or dependency-lock
/// directory.
pub fn is_excluded_path(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| EXCLUDED_DIRS.contains(&s))
            .unwrap_or(false)
    })
}

/// The four line patterns, compiled once per cycle against the configured
/// target name.
struct LinePatterns {
    name: Regex,
    params: Regex,
    testcases: Regex,
    testbench: Regex,
}

impl LinePatterns {
    fn new(target: &str) -> Result<Self> {
        Ok(Self {
            // Comment-style path fragment ending in /<target>.
            name: Regex::new(&format!(r"^\s*//.*/([^/]+)/{}", regex::escape(target)))
                .context("invalid target pattern")?,
            params: Regex::new(r"-params=(\S+)").expect("params pattern"),
            testcases: Regex::new(r"-testcases=(\S+)").expect("testcases pattern"),
            testbench: Regex::new(r"\s+(\S+)\s+\+testcases=(\S+)").expect("testbench pattern"),
        })
    }
}

/// One matched target line, before any file IO.
#[derive(Debug, PartialEq, Eq)]
struct LineMatch {
    /// Captured path segment directly above the target.
    name: String,
    /// Comma-separated parameter values, in line order.
    params: Vec<String>,
    /// Comma-separated generator case names.
    gen_cases: Vec<String>,
    /// Bench file path and its case names.
    bench: Option<(String, Vec<String>)>,
    params_raw: String,
    gen_raw: String,
    tb_raw: String,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.to_string()).collect()
}

fn match_line(line: &str, patterns: &LinePatterns) -> Option<LineMatch> {
    let name = patterns.name.captures(line)?[1].to_string();

    let mut m = LineMatch {
        name,
        params: Vec::new(),
        gen_cases: Vec::new(),
        bench: None,
        params_raw: String::new(),
        gen_raw: String::new(),
        tb_raw: String::new(),
    };

    if let Some(caps) = patterns.params.captures(line) {
        m.params_raw = caps[1].to_string();
        m.params = split_csv(&caps[1]);
    }

    if let Some(caps) = patterns.testcases.captures(line) {
        m.gen_raw = caps[1].to_string();
        m.gen_cases = split_csv(&caps[1]);
    }

    if let Some(caps) = patterns.testbench.captures(line) {
        m.tb_raw = caps[2].to_string();
        m.bench = Some((caps[1].to_string(), split_csv(&caps[2])));
    }

    Some(m)
}

/// Locate the byte range of a `TEST_CASE("<name>")` declaration marker.
fn find_case_marker(text: &str, case: &str) -> Option<(usize, usize)> {
    let pattern = format!("`TEST_CASE\\s*\\(\\s*\"{}\"\\s*\\)", regex::escape(case));
    let re = Regex::new(&pattern).ok()?;
    re.find(text).map(|m| (m.start(), m.end()))
}

fn param_value(node: &TestNode) -> String {
    match &node.id {
        TestId::Params { value, .. } => value.clone(),
        _ => node.label.clone(),
    }
}

/// Build one fully-populated simulation node from a matched line.
async fn build_simulation_node(m: &LineMatch, target: &str, root_dir: &Path) -> TestNode {
    let filename = m
        .bench
        .as_ref()
        .map(|(path, _)| path.clone())
        .unwrap_or_default();

    let mut sim = TestNode::new(
        TestId::Simulation {
            target: target.to_string(),
        },
        format!("{}/{}", m.name, target),
    )
    .with_info(TestInfo {
        name: m.name.clone(),
        filename: filename.clone(),
        target: target.to_string(),
        params: m.params_raw.clone(),
        gen_testcases: m.gen_raw.clone(),
        tb_testcases: m.tb_raw.clone(),
    });

    // Parameter variants come first so case fan-out under each value is
    // complete before generator or bench cases attach.
    let has_params = !m.params.is_empty();
    for value in &m.params {
        sim.children.push(
            TestNode::new(
                TestId::Params {
                    value: value.clone(),
                    target: target.to_string(),
                },
                value.clone(),
            )
            .with_info(TestInfo {
                name: value.clone(),
                target: target.to_string(),
                params: value.clone(),
                ..TestInfo::default()
            }),
        );
    }

    for case in &m.gen_cases {
        if has_params {
            for child in sim.children.iter_mut() {
                let param = param_value(child);
                child.children.push(
                    TestNode::new(
                        TestId::ParamGeneratorCase {
                            target: target.to_string(),
                            param: param.clone(),
                            case: case.clone(),
                        },
                        case.clone(),
                    )
                    .with_info(TestInfo {
                        name: case.clone(),
                        target: target.to_string(),
                        params: param,
                        gen_testcases: case.clone(),
                        ..TestInfo::default()
                    }),
                );
            }
        } else {
            sim.children.push(
                TestNode::new(
                    TestId::GeneratorCase {
                        target: target.to_string(),
                        case: case.clone(),
                    },
                    case.clone(),
                )
                .with_info(TestInfo {
                    name: case.clone(),
                    target: target.to_string(),
                    gen_testcases: case.clone(),
                    ..TestInfo::default()
                }),
            );
        }
    }

    if let Some((path, cases)) = &m.bench {
        let file = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            root_dir.join(path)
        };
        // Unreadable file degrades to nodes without a source range.
        let text = tokio::fs::read_to_string(&file).await.ok();

        for case in cases {
            let location = text
                .as_deref()
                .and_then(|t| find_case_marker(t, case))
                .map(|(start, end)| SourceLocation {
                    file: file.clone(),
                    start,
                    end,
                });

            if has_params {
                for child in sim.children.iter_mut() {
                    let param = param_value(child);
                    child.children.push(
                        TestNode::new(
                            TestId::ParamBenchCase {
                                target: target.to_string(),
                                param: param.clone(),
                                case: case.clone(),
                            },
                            format!("{} ({})", case, param),
                        )
                        .with_source_location(location.clone())
                        .with_info(TestInfo {
                            name: case.clone(),
                            filename: filename.clone(),
                            target: target.to_string(),
                            params: param,
                            tb_testcases: case.clone(),
                            ..TestInfo::default()
                        }),
                    );
                }
            } else {
                sim.children.push(
                    TestNode::new(
                        TestId::BenchCase {
                            target: target.to_string(),
                            case: case.clone(),
                        },
                        case.clone(),
                    )
                    .with_source_location(location.clone())
                    .with_info(TestInfo {
                        name: case.clone(),
                        filename: filename.clone(),
                        target: target.to_string(),
                        tb_testcases: case.clone(),
                        ..TestInfo::default()
                    }),
                );
            }
        }
    }

    sim
}

/// Parse one full build-tool output blob into a tree.
pub async fn parse_build_output(output: &str, target: &str, root_dir: &Path) -> Result<TestTree> {
    let patterns = LinePatterns::new(target)?;
    let mut tree = TestTree::default();

    for line in output.lines() {
        if let Some(m) = match_line(line, &patterns) {
            let sim = build_simulation_node(&m, target, root_dir).await;
            tree.roots.push(sim);
        }
    }

    Ok(tree)
}
