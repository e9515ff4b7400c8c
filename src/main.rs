mod config;
mod diagnostics;
mod discovery;
mod process;
mod report;
mod runner;
mod test_id;
mod test_model;
mod watcher;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use config::Config;
use diagnostics::{Diagnostic, MessageScanner, Severity};
use discovery::{DiscoveryEngine, DiscoveryOutcome};
use report::ConsoleReporter;
use runner::{RunRequest, TestRunner};
use test_model::{TestNode, TestTree};
use watcher::DiscoveryWatcher;

const CONFIG_FILE: &str = "simx.toml";

#[derive(Parser)]
#[command(name = "simx")]
#[command(about = "Test explorer for dbt-built HDL simulations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: simx.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover test cases and print the tree
    Discover {
        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// List runnable leaf test ids
    List,

    /// Run selected tests, or all when no ids are given
    Run {
        /// Test ids to run
        ids: Vec<String>,

        /// Test ids to exclude, children included
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Use the tool's debug verb instead of the test verb
        #[arg(long)]
        debug: bool,

        /// Echo captured simulator output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Watch source files and re-discover on changes
    Watch,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config_path = std::fs::canonicalize(&config_path)
        .with_context(|| format!("Could not find config file: {}", config_path.display()))?;

    let base_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;

    match cli.command {
        Commands::Discover { json } => cmd_discover(config, base_dir, json).await,
        Commands::List => cmd_list(config, base_dir).await,
        Commands::Run {
            ids,
            exclude,
            debug,
            verbose,
        } => cmd_run(config, base_dir, ids, exclude, debug, verbose).await,
        Commands::Watch => cmd_watch(config, base_dir).await,
    }
}

async fn discover_tree(engine: &DiscoveryEngine) -> Result<std::sync::Arc<TestTree>> {
    match engine.discover(None).await? {
        DiscoveryOutcome::Published(tree) => Ok(tree),
        DiscoveryOutcome::Skipped(reason) => {
            anyhow::bail!("discovery did not produce a tree ({:?})", reason)
        }
    }
}

async fn cmd_discover(config: Config, base_dir: PathBuf, json: bool) -> Result<()> {
    let engine = DiscoveryEngine::new(config, base_dir);
    let tree = discover_tree(&engine).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&*tree)?);
        return Ok(());
    }

    if tree.is_empty() {
        println!("{}", "No test cases discovered".dimmed());
        return Ok(());
    }

    for root in &tree.roots {
        print_node(root, 0);
    }
    println!(
        "\n{} {} test case(s)",
        "✓".green(),
        tree.leaf_count()
    );

    Ok(())
}

fn print_node(node: &TestNode, depth: usize) {
    let indent = "  ".repeat(depth);
    if node.is_leaf() {
        println!(
            "{}{} {}",
            indent,
            node.label,
            node.id.to_string().dimmed()
        );
    } else {
        println!("{}{}", indent, node.label.bold());
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

async fn cmd_list(config: Config, base_dir: PathBuf) -> Result<()> {
    let engine = DiscoveryEngine::new(config, base_dir);
    let tree = discover_tree(&engine).await?;

    for leaf in tree.leaves() {
        println!("{}", leaf.id);
    }

    Ok(())
}

async fn cmd_run(
    config: Config,
    base_dir: PathBuf,
    ids: Vec<String>,
    exclude: Vec<String>,
    debug: bool,
    verbose: bool,
) -> Result<()> {
    let engine = DiscoveryEngine::new(config.clone(), base_dir.clone());
    let tree = discover_tree(&engine).await?;

    let request = RunRequest {
        include: if ids.is_empty() { None } else { Some(ids) },
        exclude: exclude.into_iter().collect::<HashSet<_>>(),
        debug,
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", "Cancelling run...".yellow());
            signal_token.cancel();
        }
    });

    let mut runner = TestRunner::new(&config, &base_dir);
    let mut reporter = ConsoleReporter::new(verbose);
    let mut scanner = MessageScanner::new();
    let mut diagnostics = Vec::new();

    let summary = runner
        .run(
            &tree,
            &request,
            &cancel,
            &mut reporter,
            &mut scanner,
            &mut diagnostics,
        )
        .await?;

    report::print_summary(&summary);
    print_diagnostics(&diagnostics);

    if !summary.all_passed() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("\n{}", "Diagnostics:".bold());
    for d in diagnostics {
        let severity = match d.severity {
            Severity::Error => "error".red(),
            Severity::Warning => "warning".yellow(),
        };
        let position = match d.col {
            Some(col) => format!("{}:{}:{}", d.file.display(), d.line, col),
            None => format!("{}:{}", d.file.display(), d.line),
        };
        println!("  {} {} {}", severity, position.cyan(), d.message);
    }
}

async fn cmd_watch(config: Config, base_dir: PathBuf) -> Result<()> {
    let globs = config.watch.clone();
    let engine = DiscoveryEngine::new(config, base_dir.clone());

    // Discover once on startup so the watch loop starts from a fresh tree.
    println!("{} Discovering tests...", "🔍".cyan());
    match engine.discover(None).await? {
        DiscoveryOutcome::Published(tree) => {
            println!("{} Found {} test case(s)", "✓".green(), tree.leaf_count());
        }
        DiscoveryOutcome::Skipped(reason) => {
            println!("{}", format!("initial discovery skipped ({:?})", reason).dimmed());
        }
    }

    let watcher = DiscoveryWatcher::new(&engine, &base_dir, &globs)?;
    watcher.start().await
}
