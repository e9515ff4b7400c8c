use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Flat configuration namespace read from `simx.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Build tool binary (default: dbt).
    #[serde(default = "default_tool")]
    pub tool: String,
    /// Target name that discovery lines must end with.
    pub target: String,
    /// Simulator backend passed as `hdl-simulator=<value>`.
    #[serde(default = "default_simulator")]
    pub simulator: String,
    /// Verbosity passed to every test invocation.
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    /// Backend-specific flag strings, appended verbatim to the global
    /// argument string. Empty entries are omitted.
    #[serde(default)]
    pub backend_flags: Vec<String>,
    /// Glob patterns whose file events trigger re-discovery.
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,
}

fn default_tool() -> String {
    "dbt".to_string()
}

fn default_simulator() -> String {
    "xsim".to_string()
}

fn default_verbosity() -> String {
    "medium".to_string()
}

fn default_watch() -> Vec<String> {
    vec!["**/*.go".to_string(), "**/*.sv".to_string()]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).with_context(|| "Failed to parse simx.toml")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            anyhow::bail!("'target' must not be empty");
        }
        if self.tool.trim().is_empty() {
            anyhow::bail!("'tool' must not be empty");
        }
        Ok(())
    }

    /// Global argument string shared by every test invocation: simulator
    /// selection plus any non-empty backend flags.
    pub fn global_args(&self) -> String {
        let mut args = format!("hdl-simulator={}", self.simulator);
        for flag in &self.backend_flags {
            if !flag.is_empty() {
                args.push(' ');
                args.push_str(flag);
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
target = "chip"
simulator = "questa"
verbosity = "high"
backend_flags = ["questa-timescale=1ns/1ps", ""]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.tool, "dbt");
        assert_eq!(config.target, "chip");
        assert_eq!(config.simulator, "questa");
        assert_eq!(config.verbosity, "high");
        assert_eq!(config.watch, vec!["**/*.go", "**/*.sv"]);
    }

    #[test]
    fn test_global_args_omits_empty_flags() {
        let config: Config = toml::from_str(
            r#"
target = "chip"
backend_flags = ["", "xsim-wdb=waves.wdb"]
"#,
        )
        .unwrap();
        assert_eq!(config.global_args(), "hdl-simulator=xsim xsim-wdb=waves.wdb");
    }

    #[test]
    fn test_rejects_empty_target() {
        let config: Config = toml::from_str(r#"target = " ""#).unwrap();
        assert!(config.validate().is_err());
    }
}
