//! SidecarManager: per-run installer/launcher/reaper of dynamic MCP
//! sidecars (spec §4.8), grounded in
//! `original_source/jelly/mcp_sidecar_manager.py::MCPSidecarManager`.

use crate::config::Config;
use crate::log_sink::{Level, LogSink};
use crate::mcp::models::MCPServer;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    NativeSse,
    Bridge,
}

impl LaunchMode {
    fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::NativeSse => "native_sse",
            LaunchMode::Bridge => "bridge",
        }
    }
}

struct ManagedSidecar {
    endpoint: String,
    port: u16,
    launch_mode: LaunchMode,
    child: Child,
    log_path: PathBuf,
}

/// Summary counters reported at the end of a run (spec §7's "summary line").
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SidecarSummary {
    pub dynamic_installed: usize,
    pub dynamic_launched: usize,
    pub dynamic_reused: usize,
    pub dynamic_failed: usize,
    pub dynamic_failed_servers: Vec<String>,
    pub dynamic_failed_install_servers: Vec<String>,
    pub dynamic_failed_install_packages: Vec<String>,
    pub dynamic_launch_modes: BTreeMap<String, usize>,
}

struct Counters {
    installed_servers: HashSet<String>,
    launched_servers: HashSet<String>,
    reused_servers: HashSet<String>,
    failed_servers: HashSet<String>,
    failed_install_servers: HashSet<String>,
    failed_install_packages: HashSet<String>,
    launch_modes_by_server: HashMap<String, LaunchMode>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            installed_servers: HashSet::new(),
            launched_servers: HashSet::new(),
            reused_servers: HashSet::new(),
            failed_servers: HashSet::new(),
            failed_install_servers: HashSet::new(),
            failed_install_packages: HashSet::new(),
            launch_modes_by_server: HashMap::new(),
        }
    }
}

pub struct SidecarManager<'a> {
    config: &'a Config,
    project_dir: PathBuf,
    state_dir: PathBuf,
    log: &'a LogSink,
    managed: Mutex<HashMap<String, ManagedSidecar>>,
    used_ports: Mutex<HashSet<u16>>,
    counters: Mutex<Counters>,
}

impl<'a> SidecarManager<'a> {
    pub fn new(config: &'a Config, project_dir: impl Into<PathBuf>, log: &'a LogSink) -> Result<Self> {
        let project_dir = project_dir.into();
        let state_dir = project_dir.join(".mcp").join("dynamic_sidecars");
        std::fs::create_dir_all(&state_dir).context("failed to create sidecar state dir")?;
        Ok(Self {
            config,
            project_dir,
            state_dir,
            log,
            managed: Mutex::new(HashMap::new()),
            used_ports: Mutex::new(HashSet::new()),
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Install a server's sidecar package if needed, caching failures at
    /// both the server and package granularity.
    pub async fn install_if_needed(&self, server: &MCPServer) -> bool {
        let package_name = server.sidecar_package.clone().unwrap_or_default();
        {
            let counters = self.counters.lock().unwrap();
            if counters.failed_install_servers.contains(&server.name) {
                self.log.event(Level::Warning, "sidecar_manager", "install_if_needed.skipped_failed_server", vec![("server".into(), serde_json::json!(server.name))]);
                return false;
            }
            if !package_name.is_empty() && counters.failed_install_packages.contains(&package_name) {
                drop(counters);
                self.log.event(Level::Warning, "sidecar_manager", "install_if_needed.skipped_failed_package", vec![("server".into(), serde_json::json!(server.name)), ("package".into(), serde_json::json!(package_name))]);
                self.counters.lock().unwrap().failed_install_servers.insert(server.name.clone());
                return false;
            }
        }

        let Some(install_cmd) = resolve_install_command(server) else {
            return true;
        };
        if install_cmd.is_empty() {
            return true;
        }

        let timeout = Duration::from_secs(self.config.mcp.dynamic_install_timeout_seconds);
        let ok = run_to_completion(&install_cmd, &self.project_dir, timeout).await;

        let mut counters = self.counters.lock().unwrap();
        if ok {
            counters.installed_servers.insert(server.name.clone());
            drop(counters);
            self.log.event(Level::Info, "sidecar_manager", "install_if_needed.complete", vec![("server".into(), serde_json::json!(server.name))]);
        } else {
            counters.failed_servers.insert(server.name.clone());
            counters.failed_install_servers.insert(server.name.clone());
            if !package_name.is_empty() {
                counters.failed_install_packages.insert(package_name);
            }
            drop(counters);
            self.log.event(Level::Error, "sidecar_manager", "install_if_needed.failed", vec![("server".into(), serde_json::json!(server.name))]);
        }
        ok
    }

    /// Return an already-running endpoint, or launch a fresh one.
    pub async fn ensure_running(&self, server: &MCPServer) -> Result<String> {
        if self.counters.lock().unwrap().failed_servers.contains(&server.name) {
            anyhow::bail!("dynamic sidecar '{}' is quarantined after prior failure", server.name);
        }
        if let Some(endpoint) = self.get_endpoint(&server.name) {
            self.counters.lock().unwrap().reused_servers.insert(server.name.clone());
            return Ok(endpoint);
        }
        self.launch_sidecar(server).await
    }

    pub fn get_endpoint(&self, name: &str) -> Option<String> {
        let mut managed = self.managed.lock().unwrap();
        let sidecar = managed.get_mut(name)?;
        if is_running(&mut sidecar.child) {
            Some(sidecar.endpoint.clone())
        } else {
            None
        }
    }

    pub async fn launch_sidecar(&self, server: &MCPServer) -> Result<String> {
        if !self.config.mcp.dynamic_sidecars_enabled {
            anyhow::bail!("dynamic sidecar provisioning is disabled by config");
        }
        if self.counters.lock().unwrap().failed_servers.contains(&server.name) {
            anyhow::bail!("dynamic sidecar '{}' was previously marked failed in this run", server.name);
        }
        if self.managed.lock().unwrap().len() >= self.config.mcp.dynamic_max_sidecars_per_run {
            anyhow::bail!(
                "maximum dynamic sidecars per run reached ({})",
                self.config.mcp.dynamic_max_sidecars_per_run
            );
        }
        if !self.install_if_needed(server).await {
            anyhow::bail!("failed to install dynamic sidecar for '{}'", server.name);
        }

        let host = self.config.mcp.dynamic_sidecar_host.clone();
        let port = server.sidecar_port.unwrap_or(self.allocate_port()?);
        let endpoint = format!("http://{host}:{port}/mcp");
        let log_path = self.state_dir.join(format!("{}.log", safe_name(&server.name)));
        let startup_timeout = Duration::from_secs(self.config.mcp.dynamic_startup_timeout_seconds);

        let mut launch_mode = preferred_launch_mode(server);
        let mut process_cmd = self.build_launch_command(server, &host, port, launch_mode)?;
        let mut child = self.spawn_process(&process_cmd, &log_path)?;

        self.log.event(
            Level::Info,
            "sidecar_manager",
            "launch_sidecar.start",
            vec![
                ("server".into(), serde_json::json!(server.name)),
                ("endpoint".into(), serde_json::json!(endpoint)),
                ("port".into(), serde_json::json!(port)),
                ("launch_mode".into(), serde_json::json!(launch_mode.as_str())),
            ],
        );

        let mut healthy = self
            .health_check(&endpoint, startup_timeout, &server.name, launch_mode, &mut child)
            .await;

        if !healthy && launch_mode == LaunchMode::NativeSse {
            self.log.event(Level::Warning, "sidecar_manager", "launch_sidecar.native_failed_fallback_bridge", vec![("server".into(), serde_json::json!(server.name))]);
            stop_process(&mut child).await;
            launch_mode = LaunchMode::Bridge;
            process_cmd = self.build_launch_command(server, &host, port, launch_mode)?;
            child = self.spawn_process(&process_cmd, &log_path)?;
            healthy = self
                .health_check(&endpoint, startup_timeout, &server.name, launch_mode, &mut child)
                .await;
        }

        if !healthy {
            self.counters.lock().unwrap().failed_servers.insert(server.name.clone());
            stop_process(&mut child).await;
            let tail = log_tail(&log_path, 1200);
            anyhow::bail!(
                "dynamic sidecar '{}' failed health check at {}. log_tail={}",
                server.name,
                endpoint,
                tail
            );
        }

        self.managed.lock().unwrap().insert(
            server.name.clone(),
            ManagedSidecar {
                endpoint: endpoint.clone(),
                port,
                launch_mode,
                child,
                log_path,
            },
        );
        self.used_ports.lock().unwrap().insert(port);
        {
            let mut counters = self.counters.lock().unwrap();
            counters.launched_servers.insert(server.name.clone());
            counters.launch_modes_by_server.insert(server.name.clone(), launch_mode);
        }
        self.log.event(
            Level::Info,
            "sidecar_manager",
            "launch_sidecar.ready",
            vec![
                ("server".into(), serde_json::json!(server.name)),
                ("endpoint".into(), serde_json::json!(endpoint)),
                ("launch_mode".into(), serde_json::json!(launch_mode.as_str())),
            ],
        );
        Ok(endpoint)
    }

    fn build_launch_command(
        &self,
        server: &MCPServer,
        host: &str,
        port: u16,
        mode: LaunchMode,
    ) -> Result<Vec<String>> {
        match mode {
            LaunchMode::NativeSse => native_launch_command(server, host, port)
                .context("server has no native HTTP/SSE launch command"),
            LaunchMode::Bridge => {
                let launch_cmd = resolve_sidecar_command(server)?;
                let self_exe = std::env::current_exe()
                    .context("failed to resolve current executable for sidecar bridge relaunch")?
                    .to_string_lossy()
                    .to_string();
                let mut cmd = vec![
                    self_exe,
                    "mcp-sidecar-bridge".to_string(),
                    "--name".to_string(),
                    server.name.clone(),
                    "--host".to_string(),
                    host.to_string(),
                    "--port".to_string(),
                    port.to_string(),
                    "--timeout-seconds".to_string(),
                    self.config.mcp.dynamic_startup_timeout_seconds.to_string(),
                    "--cwd".to_string(),
                    self.project_dir.to_string_lossy().to_string(),
                    "--".to_string(),
                ];
                cmd.extend(launch_cmd);
                Ok(cmd)
            }
        }
    }

    fn spawn_process(&self, command: &[String], log_path: &Path) -> Result<Child> {
        let (cmd, args) = command.split_first().context("empty sidecar launch command")?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .context("failed to open sidecar log file")?;
        let log_file_err = log_file.try_clone().context("failed to clone sidecar log handle")?;
        let mut process = Command::new(cmd);
        process
            .args(args)
            .current_dir(&self.project_dir)
            .stdout(log_file)
            .stderr(log_file_err)
            .kill_on_drop(true);
        process.spawn().context("failed to spawn sidecar process")
    }

    async fn health_check(
        &self,
        endpoint: &str,
        timeout: Duration,
        server_name: &str,
        launch_mode: LaunchMode,
        child: &mut Child,
    ) -> bool {
        let deadline = Instant::now() + timeout.max(Duration::from_secs(1));
        let mut last_error = String::new();
        let client = reqwest::Client::new();

        while Instant::now() < deadline {
            if !is_running(child) {
                self.log.event(Level::Error, "sidecar_manager", "health_check.process_exited", vec![("server".into(), serde_json::json!(server_name)), ("launch_mode".into(), serde_json::json!(launch_mode.as_str()))]);
                return false;
            }

            let probe_result = match launch_mode {
                LaunchMode::NativeSse => probe_native_sse(&client, endpoint).await,
                LaunchMode::Bridge => probe_bridge_health(&client, endpoint).await,
            };
            match probe_result {
                Ok(true) => return true,
                Ok(false) | Err(_) => {
                    if let Err(e) = probe_result {
                        last_error = e;
                    }
                }
            }
            sleep(Duration::from_millis(200)).await;
        }

        self.log.event(
            Level::Error,
            "sidecar_manager",
            "health_check.timeout",
            vec![
                ("server".into(), serde_json::json!(server_name)),
                ("launch_mode".into(), serde_json::json!(launch_mode.as_str())),
                ("endpoint".into(), serde_json::json!(endpoint)),
                ("error_message".into(), serde_json::json!(last_error)),
            ],
        );
        false
    }

    fn allocate_port(&self) -> Result<u16> {
        let start = self.config.mcp.dynamic_sidecar_base_port;
        let span = self.config.mcp.dynamic_sidecar_port_span;
        let used = self.used_ports.lock().unwrap();
        for port in start..start.saturating_add(span) {
            if used.contains(&port) {
                continue;
            }
            if port_is_free(&self.config.mcp.dynamic_sidecar_host, port) {
                return Ok(port);
            }
        }
        anyhow::bail!("no free sidecar ports in range {}-{}", start, start.saturating_add(span).saturating_sub(1))
    }

    pub async fn stop_all(&self) {
        let mut managed = self.managed.lock().unwrap();
        let entries: Vec<(String, ManagedSidecar)> = managed.drain().collect();
        drop(managed);
        for (name, mut sidecar) in entries {
            stop_process(&mut sidecar.child).await;
            self.log.event(
                Level::Info,
                "sidecar_manager",
                "stop_all.stopped",
                vec![
                    ("server".into(), serde_json::json!(name)),
                    ("endpoint".into(), serde_json::json!(sidecar.endpoint)),
                    ("port".into(), serde_json::json!(sidecar.port)),
                ],
            );
        }
        self.used_ports.lock().unwrap().clear();
    }

    pub fn summary(&self) -> SidecarSummary {
        let counters = self.counters.lock().unwrap();
        let mut launch_mode_counts: BTreeMap<String, usize> = BTreeMap::new();
        for mode in counters.launch_modes_by_server.values() {
            *launch_mode_counts.entry(mode.as_str().to_string()).or_insert(0) += 1;
        }
        SidecarSummary {
            dynamic_installed: counters.installed_servers.len(),
            dynamic_launched: counters.launched_servers.len(),
            dynamic_reused: counters.reused_servers.len(),
            dynamic_failed: counters.failed_servers.len(),
            dynamic_failed_servers: sorted(&counters.failed_servers),
            dynamic_failed_install_servers: sorted(&counters.failed_install_servers),
            dynamic_failed_install_packages: sorted(&counters.failed_install_packages),
            dynamic_launch_modes: launch_mode_counts,
        }
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

fn safe_name(value: &str) -> String {
    let out: String = value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if out.is_empty() {
        "sidecar".to_string()
    } else {
        out
    }
}

fn is_running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

async fn stop_process(child: &mut Child) {
    if child.start_kill().is_ok() {
        let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
    }
    let _ = child.kill().await;
}

fn port_is_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

fn log_tail(path: &Path, max_chars: usize) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        text
    } else {
        chars[chars.len() - max_chars..].iter().collect()
    }
}

/// `native_sse` is preferred for servers known to speak HTTP/SSE natively
/// (detected by a package/command heuristic, e.g. Playwright MCP).
fn preferred_launch_mode(server: &MCPServer) -> LaunchMode {
    let haystack = format!(
        "{} {}",
        server.sidecar_package.as_deref().unwrap_or(""),
        server.sidecar_command.as_ref().map(|c| c.join(" ")).unwrap_or_default()
    );
    if haystack.contains("@playwright/mcp") {
        LaunchMode::NativeSse
    } else {
        LaunchMode::Bridge
    }
}

fn native_launch_command(server: &MCPServer, host: &str, port: u16) -> Option<Vec<String>> {
    let package = server.sidecar_package.as_deref()?;
    Some(vec![
        "npx".to_string(),
        "-y".to_string(),
        package.to_string(),
        "--host".to_string(),
        host.to_string(),
        "--port".to_string(),
        port.to_string().to_string(),
    ])
}

fn resolve_sidecar_command(server: &MCPServer) -> Result<Vec<String>> {
    if let Some(cmd) = &server.sidecar_command {
        let filtered: Vec<String> = cmd.iter().filter(|s| !s.trim().is_empty()).cloned().collect();
        if !filtered.is_empty() {
            return Ok(filtered);
        }
    }
    if let Some(command) = &server.command {
        let mut out = vec![command.clone()];
        out.extend(server.args.clone());
        return Ok(out);
    }
    if let Some(package) = &server.sidecar_package {
        return Ok(vec!["npx".to_string(), "-y".to_string(), package.clone()]);
    }
    anyhow::bail!("dynamic sidecar '{}' is missing sidecar command/package metadata", server.name)
}

fn resolve_install_command(server: &MCPServer) -> Option<Vec<String>> {
    if let Some(cmd) = &server.install_cmd {
        let filtered: Vec<String> = cmd.iter().filter(|s| !s.trim().is_empty()).cloned().collect();
        if !filtered.is_empty() {
            return Some(filtered);
        }
    }
    server
        .sidecar_package
        .as_ref()
        .map(|p| vec!["npm".to_string(), "install".to_string(), "-g".to_string(), p.clone()])
}

async fn run_to_completion(command: &[String], cwd: &Path, timeout: Duration) -> bool {
    let Some((cmd, args)) = command.split_first() else {
        return true;
    };
    let mut process = Command::new(cmd);
    process.args(args).current_dir(cwd).stdout(std::process::Stdio::null()).stderr(std::process::Stdio::null());
    let Ok(mut child) = process.spawn() else {
        return false;
    };
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        _ => {
            let _ = child.start_kill();
            false
        }
    }
}

async fn probe_bridge_health(client: &reqwest::Client, endpoint: &str) -> Result<bool, String> {
    let base = endpoint.strip_suffix("/mcp").unwrap_or(endpoint);
    let health_url = format!("{}/health", base.trim_end_matches('/'));
    match client
        .get(&health_url)
        .timeout(Duration::from_millis(1500))
        .send()
        .await
    {
        Ok(resp) => Ok(resp.status().is_success()),
        Err(e) => Err(e.to_string()),
    }
}

async fn probe_native_sse(client: &reqwest::Client, endpoint: &str) -> Result<bool, String> {
    let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
    match client
        .post(endpoint)
        .json(&body)
        .timeout(Duration::from_millis(2000))
        .send()
        .await
    {
        Ok(resp) => Ok(resp.status().is_success()),
        Err(e) => Err(e.to_string()),
    }
}
