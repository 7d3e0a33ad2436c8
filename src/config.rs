//! Configuration for the Builder pipeline.
//!
//! TOML file + environment variable overrides + validation, following the
//! same pattern as the teacher crate this repo is built from: config lives
//! under the XDG config directory, every section implements `Default`, and
//! `BUILDER_*` environment variables take precedence over file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub lm: LmConfig,
    pub orchestrator: OrchestratorConfig,
    pub capability: CapabilityConfig,
    pub pregnancy: PregnancyConfig,
    pub mcp: McpConfig,
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console log level for `tracing` (trace, debug, info, warn, error).
    pub level: String,
    /// Console log format (json, pretty, compact).
    pub format: String,
    /// Directory for the structured run log (spec §6: `log_dir/run_<run_id>.jsonl`).
    pub log_dir: String,
    /// Severity threshold for the structured run log.
    pub run_log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_dir: "./.builder_logs".to_string(),
            run_log_level: "INFO".to_string(),
        }
    }
}

/// LM client defaults, grounded in `original_source/jelly/config.py`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LmConfig {
    pub model: String,
    pub api_key_env: String,
    pub api_base_url: String,
    pub programmer_max_tokens: u32,
    pub test_designer_max_tokens: u32,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            api_key_env: "BUILDER_LM_API_KEY".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            programmer_max_tokens: 8192,
            test_designer_max_tokens: 4096,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpUnavailableBehavior {
    FailClosed,
    WarnAndContinue,
    UnitOnlyFallback,
}

impl Default for McpUnavailableBehavior {
    fn default() -> Self {
        McpUnavailableBehavior::WarnAndContinue
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_fix_iterations: u32,
    pub test_timeout_seconds: u64,
    pub keep_sandbox_on_failure: bool,
    pub clean_output_before_write: bool,
    pub capability_gate_enabled: bool,
    pub mcp_bootstrap_enabled: bool,
    pub mcp_unavailable_behavior: McpUnavailableBehavior,
    pub test_harness_command: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: 3,
            test_timeout_seconds: 30,
            keep_sandbox_on_failure: false,
            clean_output_before_write: false,
            capability_gate_enabled: true,
            mcp_bootstrap_enabled: true,
            mcp_unavailable_behavior: McpUnavailableBehavior::WarnAndContinue,
            test_harness_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "tests/".to_string(),
                "-v".to_string(),
                "--tb=short".to_string(),
                "-q".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Minimum LM-reported confidence for a `capable` decision
    /// (comparison is `>=`, per spec.md's Open Question resolution).
    pub confidence_threshold: f64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PregnancyConfig {
    pub max_depth: u32,
    pub workspace_dir: String,
    pub timeout_seconds: u64,
}

impl Default for PregnancyConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            workspace_dir: "./.builder_pregnancy".to_string(),
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpBootstrapTransportMode {
    PythonPlusNodeSidecar,
    AllowNodeStdio,
    PythonStdioOnly,
}

impl Default for McpBootstrapTransportMode {
    fn default() -> Self {
        McpBootstrapTransportMode::PythonPlusNodeSidecar
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    pub bootstrap_transport_mode: McpBootstrapTransportMode,
    pub filesystem_endpoint_env: String,
    pub browser_endpoint_env: String,
    pub allow_node_stdio: bool,

    pub dynamic_sidecars_enabled: bool,
    pub dynamic_max_sidecars_per_run: usize,
    pub dynamic_sidecar_host: String,
    pub dynamic_sidecar_base_port: u16,
    pub dynamic_sidecar_port_span: u16,
    pub dynamic_install_timeout_seconds: u64,
    pub dynamic_startup_timeout_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            bootstrap_transport_mode: McpBootstrapTransportMode::default(),
            filesystem_endpoint_env: "BUILDER_MCP_FILESYSTEM_ENDPOINT".to_string(),
            browser_endpoint_env: "BUILDER_MCP_BROWSER_ENDPOINT".to_string(),
            allow_node_stdio: false,
            dynamic_sidecars_enabled: true,
            dynamic_max_sidecars_per_run: 4,
            dynamic_sidecar_host: "127.0.0.1".to_string(),
            dynamic_sidecar_base_port: 8900,
            dynamic_sidecar_port_span: 100,
            dynamic_install_timeout_seconds: 120,
            dynamic_startup_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default = "default_transport_type")]
    pub transport: String,
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub retry: bool,
}

fn default_transport_type() -> String {
    "stdio".to_string()
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec![],
            transport: default_transport_type(),
            url: None,
            timeout_secs: 30,
            retry: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            lm: LmConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            capability: CapabilityConfig::default(),
            pregnancy: PregnancyConfig::default(),
            mcp: McpConfig::default(),
            mcp_servers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default().apply_env_overrides().validated();
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        tracing::info!("Loaded configuration from {:?}", path);
        config.apply_env_overrides().validated()
    }

    /// Default config file path: `~/.config/builder/config.toml` (XDG).
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "builder", "Builder") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("builder").join("config.toml")
        }
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("BUILDER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("BUILDER_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(dir) = std::env::var("BUILDER_LOG_DIR") {
            self.logging.log_dir = dir;
        }
        if let Ok(model) = std::env::var("BUILDER_LM_MODEL") {
            self.lm.model = model;
        }
        if let Ok(iterations) = std::env::var("BUILDER_MAX_FIX_ITERATIONS") {
            if let Ok(n) = iterations.parse::<u32>() {
                if n >= 1 {
                    self.orchestrator.max_fix_iterations = n;
                }
            }
        }
        if let Ok(secs) = std::env::var("BUILDER_TEST_TIMEOUT_SECONDS") {
            if let Ok(n) = secs.parse::<u64>() {
                if n > 0 {
                    self.orchestrator.test_timeout_seconds = n;
                }
            }
        }
        if let Ok(depth) = std::env::var("BUILDER_PREGNANCY_MAX_DEPTH") {
            if let Ok(n) = depth.parse::<u32>() {
                self.pregnancy.max_depth = n;
            }
        }
        if let Ok(val) = std::env::var("BUILDER_ALLOW_NODE_STDIO") {
            self.mcp.allow_node_stdio = val == "1" || val.eq_ignore_ascii_case("true");
        }
        self
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.max_fix_iterations == 0 {
            anyhow::bail!("orchestrator.max_fix_iterations must be >= 1");
        }
        if self.orchestrator.test_harness_command.is_empty() {
            anyhow::bail!("orchestrator.test_harness_command must not be empty");
        }
        if !(0.0..=1.0).contains(&self.capability.confidence_threshold) {
            anyhow::bail!("capability.confidence_threshold must be in [0,1]");
        }
        if self.mcp.dynamic_sidecar_port_span == 0 {
            anyhow::bail!("mcp.dynamic_sidecar_port_span must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.orchestrator.max_fix_iterations, 3);
    }

    #[test]
    fn load_valid_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [orchestrator]
            max_fix_iterations = 5
            "#,
        )
        .unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.orchestrator.max_fix_iterations, 5);
    }

    #[test]
    fn load_invalid_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml {{{").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn rejects_zero_max_fix_iterations() {
        let mut config = Config::default();
        config.orchestrator.max_fix_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var("BUILDER_MAX_FIX_ITERATIONS", "7");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[orchestrator]\nmax_fix_iterations = 5\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.orchestrator.max_fix_iterations, 7);
        std::env::remove_var("BUILDER_MAX_FIX_ITERATIONS");
    }
}
