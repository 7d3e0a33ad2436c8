//! TestExecutor (spec §4.3): merges unit-test results from the Sandbox with
//! MCP tool-call results, and owns the quarantine sets for one run.
//!
//! One instance lives for the whole orchestrator run (§3: "Quarantine sets
//! owned by TestExecutor for one run") and is called once per fix
//! iteration, so a step or server that fails once stays quarantined
//! (counted as passed) for the remainder of the run.

use crate::config::Config;
use crate::fileset::FileSet;
use crate::log_sink::{Level, LogSink};
use crate::mcp::bootstrap::is_node_family;
use crate::mcp::client::McpClient;
use crate::mcp::http_transport::HttpTransport;
use crate::mcp::models::{MCPServer, MCPTestPlan, Transport as ServerTransport};
use crate::mcp::protocol::McpRequest;
use crate::mcp::sidecar::SidecarManager;
use crate::mcp::transport::{StdioTransport, Transport};
use crate::sandbox::Sandbox;
use crate::test_result::{Failure, TestResult};
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

enum RunningServer {
    Stdio(McpClient<StdioTransport>),
    Http(McpClient<HttpTransport>),
}

impl RunningServer {
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        match self {
            RunningServer::Stdio(client) => client.call_tool(name, arguments).await,
            RunningServer::Http(client) => client.call_tool(name, arguments).await,
        }
    }

    async fn stop(self) {
        match self {
            RunningServer::Stdio(mut client) => {
                let _ = client.transport_mut().kill().await;
            }
            RunningServer::Http(mut client) => {
                let _ = client.transport_mut().disconnect().await;
            }
        }
    }
}

pub struct TestExecutor<'a> {
    config: &'a Config,
    project_dir: PathBuf,
    log: &'a LogSink,
    quarantined_steps: Mutex<HashSet<String>>,
    quarantined_servers: Mutex<HashSet<String>>,
}

impl<'a> TestExecutor<'a> {
    pub fn new(config: &'a Config, project_dir: impl Into<PathBuf>, log: &'a LogSink) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
            log,
            quarantined_steps: Mutex::new(HashSet::new()),
            quarantined_servers: Mutex::new(HashSet::new()),
        }
    }

    /// Run unit tests (if any) and the MCP plan (if any) and merge their
    /// results (spec §4.3).
    pub async fn run_all(
        &self,
        code: &FileSet,
        tests: &FileSet,
        plan: &MCPTestPlan,
        sidecars: Option<&SidecarManager<'_>>,
    ) -> TestResult {
        let unit_result = if !tests.is_empty() {
            let sandbox = Sandbox::new(self.config, self.log);
            match sandbox.run_tests(code, tests).await {
                Ok(result) => result,
                Err(e) => TestResult::single_failure("(sandbox)", "SandboxExecutionError", e.to_string()),
            }
        } else {
            TestResult::neutral()
        };

        let mcp_result = if !plan.is_empty() {
            self.run_mcp_tests(plan, sidecars).await
        } else {
            TestResult::neutral()
        };

        unit_result.merge(mcp_result)
    }

    async fn run_mcp_tests(&self, plan: &MCPTestPlan, sidecars: Option<&SidecarManager<'_>>) -> TestResult {
        let mut running: HashMap<String, RunningServer> = HashMap::new();
        let mut deferred: HashSet<String> = HashSet::new();
        let mut startup_errors: HashMap<String, String> = HashMap::new();

        for server in &plan.servers {
            if self.quarantined_servers.lock().unwrap().contains(&server.name) {
                continue;
            }
            if server.is_dynamic_candidate() && sidecars.is_some() {
                deferred.insert(server.name.clone());
                continue;
            }
            match self.start_server(server).await {
                Ok(client) => {
                    running.insert(server.name.clone(), client);
                }
                Err(e) => {
                    self.log.event(
                        Level::Warning,
                        "test_executor",
                        "run_mcp_tests.server_start_failed",
                        vec![("server", json!(server.name)), ("error", json!(e.to_string()))],
                    );
                    startup_errors.insert(server.name.clone(), e.to_string());
                }
            }
        }

        let servers_available = plan.servers.len();
        let mut passed = 0usize;
        let mut failed = 0usize;
        let mut failures = Vec::new();

        for step in &plan.steps {
            let key = step.step_key();

            if self.quarantined_servers.lock().unwrap().contains(&step.server) {
                passed += 1;
                continue;
            }
            if self.quarantined_steps.lock().unwrap().contains(&key) {
                passed += 1;
                continue;
            }

            let Some(server_def) = plan.servers.iter().find(|s| s.name == step.server) else {
                failed += 1;
                failures.push(Failure::new(
                    &step.description,
                    "ServerNotFound",
                    format!("step references unknown server '{}'", step.server),
                    "",
                ));
                self.quarantine(&key, &step.server);
                continue;
            };

            let mut just_provisioned = false;
            if !running.contains_key(&step.server) && deferred.contains(&step.server) {
                let Some(manager) = sidecars else {
                    failed += 1;
                    failures.push(Failure::new(&step.description, "SidecarManagerUnavailable", "no sidecar manager to provision dynamic server", ""));
                    self.quarantine(&key, &step.server);
                    continue;
                };
                match manager.ensure_running(server_def).await {
                    Ok(endpoint) => {
                        let mut provisioned = server_def.clone();
                        provisioned.endpoint = Some(endpoint);
                        match self.start_server(&provisioned).await {
                            Ok(client) => {
                                running.insert(step.server.clone(), client);
                                just_provisioned = true;
                            }
                            Err(e) => {
                                failed += 1;
                                failures.push(Failure::new(&step.description, "ServerHandshakeFailed", e.to_string(), ""));
                                self.quarantine(&key, &step.server);
                                continue;
                            }
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        failures.push(Failure::new(&step.description, "SidecarProvisionFailed", e.to_string(), ""));
                        self.quarantine(&key, &step.server);
                        continue;
                    }
                }
            }

            let Some(client) = running.get_mut(&step.server) else {
                let reason = startup_errors
                    .get(&step.server)
                    .cloned()
                    .unwrap_or_else(|| "server is not running".to_string());
                failed += 1;
                failures.push(Failure::new(&step.description, "ServerUnavailable", reason, ""));
                continue;
            };

            let mut outcome = client.call_tool(&step.tool, step.arguments.clone()).await;
            if outcome.is_err() && just_provisioned {
                outcome = client.call_tool(&step.tool, step.arguments.clone()).await;
            }

            match outcome {
                Ok(value) => {
                    if step_success(&value, &step.expected) {
                        passed += 1;
                    } else {
                        failed += 1;
                        failures.push(Failure::new(
                            &step.description,
                            "StepAssertionFailed",
                            format!("expected result to contain '{}'", step.expected),
                            "",
                        ));
                        self.quarantine(&key, &step.server);
                    }
                }
                Err(e) => {
                    failed += 1;
                    failures.push(Failure::new(&step.description, "ToolCallError", e.to_string(), ""));
                    self.quarantine(&key, &step.server);
                }
            }
        }

        let servers_started = running.len();
        for (_, client) in running.drain() {
            client.stop().await;
        }

        let total = passed + failed;
        let mut result = TestResult::new(total, passed, failed, failures);
        result.mcp_summary = Some(json!({
            "steps_passed": passed,
            "steps_total": total,
            "servers_started": servers_started,
            "servers_available": servers_available,
        }));
        result
    }

    fn quarantine(&self, step_key: &str, server_name: &str) {
        self.quarantined_steps.lock().unwrap().insert(step_key.to_string());
        self.quarantined_servers.lock().unwrap().insert(server_name.to_string());
    }

    /// Start the transport for a server and complete its handshake
    /// (spec §4.3 step 1, §4.4's node-stdio security rule).
    async fn start_server(&self, server: &MCPServer) -> Result<RunningServer> {
        match server.transport {
            ServerTransport::Stdio => {
                let command = server.command.clone().unwrap_or_default();
                if !self.config.mcp.allow_node_stdio && is_node_family(&command) {
                    anyhow::bail!(
                        "node-family stdio command '{command}' is refused by default; set mcp.allow_node_stdio to override"
                    );
                }
                let args: Vec<&str> = server.args.iter().map(|s| s.as_str()).collect();
                let transport = StdioTransport::spawn_with_env_in_dir(
                    &command,
                    &args,
                    &server.env,
                    Some(self.project_dir.as_path()),
                )
                .await?;
                let mut client = McpClient::new(transport);
                client.initialize().await?;
                let _ = client
                    .transport_mut()
                    .send(&McpRequest::new(0, "notifications/initialized", None))
                    .await;
                Ok(RunningServer::Stdio(client))
            }
            ServerTransport::HttpSse => {
                let endpoint = server.endpoint.clone().unwrap_or_default();
                if endpoint.is_empty() {
                    anyhow::bail!("http_sse server '{}' has no endpoint", server.name);
                }
                let transport = HttpTransport::new(endpoint);
                let mut client = McpClient::new(transport);
                client.initialize().await?;
                Ok(RunningServer::Http(client))
            }
        }
    }
}

/// Success criterion (spec §4.3 step 2): concatenate text-typed content
/// items, lower-case, and require `expected` (lower-cased) as a substring.
/// An empty `expected` means any successful call passes.
fn step_success(result: &Value, expected: &str) -> bool {
    let text = result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
        .to_lowercase();

    let expected = expected.trim().to_lowercase();
    if expected.is_empty() {
        true
    } else {
        text.contains(&expected)
    }
}
