//! MCP data model (spec §3): `MCPServer`, `MCPTestPlan`, `MCPTestStep`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    HttpSse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MCPServer {
    pub name: String,
    pub transport: Transport,

    // stdio fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,

    // http_sse fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    // dynamic sidecar fields
    #[serde(default)]
    pub dynamic_sidecar: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_cmd: Option<Vec<String>>,
}

impl MCPServer {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Stdio,
            command: Some(command.into()),
            args,
            env: Default::default(),
            endpoint: None,
            dynamic_sidecar: false,
            sidecar_package: None,
            sidecar_command: None,
            sidecar_port: None,
            install_cmd: None,
        }
    }

    pub fn http_sse(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::HttpSse,
            command: None,
            args: Vec::new(),
            env: Default::default(),
            endpoint: Some(endpoint.into()),
            dynamic_sidecar: false,
            sidecar_package: None,
            sidecar_command: None,
            sidecar_port: None,
            install_cmd: None,
        }
    }

    /// Invariant (spec §3): a dynamic sidecar has `transport == http_sse` and
    /// starts with an empty endpoint.
    pub fn is_dynamic_candidate(&self) -> bool {
        self.dynamic_sidecar
            && self.transport == Transport::HttpSse
            && self.endpoint.as_deref().unwrap_or("").is_empty()
    }

    pub fn is_valid_dynamic_sidecar(&self) -> bool {
        !self.dynamic_sidecar || self.transport == Transport::HttpSse
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MCPTestStep {
    pub description: String,
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub expected: String,
}

impl MCPTestStep {
    /// The canonical step key used for quarantine (spec §3): JSON of
    /// `{description, server, tool, arguments}` with sorted keys.
    pub fn step_key(&self) -> String {
        let obj = serde_json::json!({
            "arguments": self.arguments,
            "description": self.description,
            "server": self.server,
            "tool": self.tool,
        });
        // serde_json::Map preserves insertion order; `json!` on a literal
        // object inserts keys in the order written above, which we wrote
        // already sorted alphabetically so the canonical form is stable.
        obj.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MCPTestPlan {
    pub servers: Vec<MCPServer>,
    pub steps: Vec<MCPTestStep>,
    pub reason: String,
}

impl MCPTestPlan {
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            steps: Vec::new(),
            reason: String::new(),
        }
    }

    /// Enforce the invariant that every step's server names a server in the
    /// plan (spec §3: "enforced by filtering at plan creation").
    pub fn new_filtered(servers: Vec<MCPServer>, steps: Vec<MCPTestStep>, reason: String) -> Self {
        let known: BTreeSet<&str> = servers.iter().map(|s| s.name.as_str()).collect();
        let steps = steps
            .into_iter()
            .filter(|s| known.contains(s.server.as_str()))
            .collect();
        Self {
            servers,
            steps,
            reason,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_sidecar_invariant() {
        let mut server = MCPServer::http_sse("s", "");
        server.dynamic_sidecar = true;
        server.endpoint = Some(String::new());
        assert!(server.is_dynamic_candidate());
        assert!(server.is_valid_dynamic_sidecar());

        let mut stdio_dynamic = MCPServer::stdio("bad", "node", vec![]);
        stdio_dynamic.dynamic_sidecar = true;
        assert!(!stdio_dynamic.is_valid_dynamic_sidecar());
    }

    #[test]
    fn plan_filters_unknown_server_steps() {
        let servers = vec![MCPServer::http_sse("fs", "http://localhost:1/mcp")];
        let steps = vec![
            MCPTestStep {
                description: "ok".into(),
                server: "fs".into(),
                tool: "read".into(),
                arguments: serde_json::json!({}),
                expected: String::new(),
            },
            MCPTestStep {
                description: "bad".into(),
                server: "unknown".into(),
                tool: "read".into(),
                arguments: serde_json::json!({}),
                expected: String::new(),
            },
        ];
        let plan = MCPTestPlan::new_filtered(servers, steps, "r".into());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].server, "fs");
    }

    #[test]
    fn step_key_is_stable_for_equal_steps() {
        let a = MCPTestStep {
            description: "d".into(),
            server: "s".into(),
            tool: "t".into(),
            arguments: serde_json::json!({"a": 1}),
            expected: "x".into(),
        };
        let b = a.clone();
        assert_eq!(a.step_key(), b.step_key());
    }
}
