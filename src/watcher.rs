//! File watcher for automatic re-discovery
//!
//! Watches the project tree and re-runs discovery whenever a build
//! descriptor or test source file changes. Bursts are tamed twice: a
//! short debounce here, and the engine's drop-not-queue in-flight guard.

use anyhow::Result;
use colored::Colorize;
use glob::Pattern;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::discovery::{DiscoveryEngine, DiscoveryOutcome};

const DEBOUNCE_MS: u128 = 300;

/// Watch loop driving an existing discovery engine.
pub struct DiscoveryWatcher<'a> {
    engine: &'a DiscoveryEngine,
    root_dir: &'a Path,
    patterns: Vec<Pattern>,
}

impl<'a> DiscoveryWatcher<'a> {
    pub fn new(engine: &'a DiscoveryEngine, root_dir: &'a Path, globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            engine,
            root_dir,
            patterns,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;

        watcher.watch(self.root_dir, RecursiveMode::Recursive)?;

        println!(
            "\n{} {} {}",
            "👀".cyan(),
            "Watching for changes in".bold(),
            self.root_dir.display()
        );
        println!("{}", "Press Ctrl+C to stop\n".dimmed());

        let mut last_run = Instant::now() - Duration::from_secs(10);

        while let Some(event) = rx.recv().await {
            if last_run.elapsed().as_millis() < DEBOUNCE_MS {
                continue;
            }

            let Some(path) = self.first_matching_path(&event) else {
                continue;
            };

            last_run = Instant::now();

            println!(
                "{} {} {}",
                "↻".yellow(),
                "Changed:".bold(),
                path.display().to_string().dimmed()
            );

            match self.engine.discover(Some(&path)).await? {
                DiscoveryOutcome::Published(tree) => {
                    println!(
                        "{} Found {} test case(s)\n",
                        "✓".green(),
                        tree.leaf_count()
                    );
                }
                DiscoveryOutcome::Skipped(reason) => {
                    println!("{}", format!("discovery skipped ({:?})", reason).dimmed());
                }
            }
        }

        Ok(())
    }

    fn first_matching_path(&self, event: &Event) -> Option<PathBuf> {
        event
            .paths
            .iter()
            .find(|p| {
                let rel = p.strip_prefix(self.root_dir).unwrap_or(p);
                self.patterns.iter().any(|pat| pat.matches_path(rel))
            })
            .cloned()
    }
}
