//! MCPBootstrap: deterministic startup of preset servers from config and
//! environment (spec §4.5), grounded in
//! `original_source/jelly/mcp.py::build_bootstrap_servers`/`bootstrap_servers`.

use crate::config::{Config, McpBootstrapTransportMode};
use crate::log_sink::{Level, LogSink};
use crate::mcp::models::{MCPServer, Transport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapResult {
    pub requested: Vec<String>,
    pub available: Vec<MCPServer>,
    pub unavailable: BTreeMap<String, String>,
}

impl BootstrapResult {
    pub fn to_status(&self) -> serde_json::Value {
        serde_json::json!({
            "requested_servers": self.requested,
            "available_servers": self.available.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            "available_count": self.available.len(),
            "unavailable": self.unavailable,
            "unavailable_count": self.unavailable.len(),
        })
    }
}

/// Build the `filesystem_browser` preset under the configured transport
/// mode. Returns an empty list for any other preset or under
/// `python_stdio_only`.
pub fn build_bootstrap_servers(config: &Config, project_dir: &Path) -> Vec<MCPServer> {
    let mcp = &config.mcp;
    let filesystem_workspace = project_dir
        .join(".mcp")
        .join("filesystem")
        .to_string_lossy()
        .to_string();

    match mcp.bootstrap_transport_mode {
        McpBootstrapTransportMode::PythonStdioOnly => Vec::new(),
        McpBootstrapTransportMode::AllowNodeStdio => vec![
            MCPServer::stdio(
                "filesystem",
                "npx",
                vec![
                    "-y".to_string(),
                    "@modelcontextprotocol/server-filesystem".to_string(),
                    filesystem_workspace,
                ],
            ),
            MCPServer::stdio("browser", "npx", vec!["-y".to_string(), "@playwright/mcp".to_string()]),
        ],
        McpBootstrapTransportMode::PythonPlusNodeSidecar => {
            let fs_endpoint = std::env::var(&mcp.filesystem_endpoint_env).unwrap_or_default();
            let browser_endpoint = std::env::var(&mcp.browser_endpoint_env).unwrap_or_default();
            vec![
                MCPServer::http_sse("filesystem", fs_endpoint),
                MCPServer::http_sse("browser", browser_endpoint),
            ]
        }
    }
}

/// Classify each bootstrap-preset server as available/unavailable and
/// return the result (spec §4.5's availability rule).
pub fn bootstrap(config: &Config, project_dir: &Path, log: &LogSink) -> BootstrapResult {
    if !config.orchestrator.mcp_bootstrap_enabled {
        log.event(Level::Info, "mcp_bootstrap", "bootstrap.skipped", vec![("reason".into(), serde_json::json!("disabled"))]);
        return BootstrapResult::default();
    }

    let servers = build_bootstrap_servers(config, project_dir);
    let mut result = BootstrapResult {
        requested: servers.iter().map(|s| s.name.clone()).collect(),
        ..Default::default()
    };

    for server in servers {
        let (available, reason) = check_server_availability(&server, config.mcp.allow_node_stdio);
        if available {
            log.event(
                Level::Info,
                "mcp_bootstrap",
                "bootstrap.server_available",
                vec![("server".into(), serde_json::json!(server.name))],
            );
            result.available.push(server);
        } else {
            log.event(
                Level::Warning,
                "mcp_bootstrap",
                "bootstrap.server_unavailable",
                vec![
                    ("server".into(), serde_json::json!(server.name)),
                    ("reason".into(), serde_json::json!(reason)),
                ],
            );
            result.unavailable.insert(server.name.clone(), reason);
        }
    }

    log.event(Level::Info, "mcp_bootstrap", "bootstrap.complete", vec![("status".into(), result.to_status())]);
    result
}

fn check_server_availability(server: &MCPServer, allow_node_stdio: bool) -> (bool, String) {
    match server.transport {
        Transport::HttpSse => {
            if server.endpoint.as_deref().unwrap_or("").is_empty() {
                (false, "missing_endpoint".to_string())
            } else {
                (true, String::new())
            }
        }
        Transport::Stdio => {
            let command = server.command.as_deref().unwrap_or("");
            if is_node_family(command) && !allow_node_stdio {
                return (false, "node_stdio_not_permitted".to_string());
            }
            if command_exists(command) {
                (true, String::new())
            } else {
                (false, "command_not_found".to_string())
            }
        }
    }
}

const NODE_FAMILY: &[&str] = &["node", "npx", "npm", "pnpm", "yarn", "bun"];

pub fn is_node_family(command: &str) -> bool {
    let base = Path::new(command)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(command);
    NODE_FAMILY.contains(&base)
}

fn command_exists(command: &str) -> bool {
    if command.is_empty() {
        return false;
    }
    let path = Path::new(command);
    if path.is_absolute() || command.contains('/') {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}
