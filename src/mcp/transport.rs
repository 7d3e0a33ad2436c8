//! MCP Transport Layer
//!
//! This module defines the transport abstraction for communicating with MCP servers.
//! Multiple transports are supported:
//!
//! - **stdio**: Standard input/output (for local MCP servers)
//! - **HTTP**: HTTP/HTTPS (for remote MCP servers, see `http_transport`)
//!
//! # Architecture
//!
//! The transport layer is responsible only for sending and receiving messages.
//! Protocol concerns (JSON-RPC formatting) are handled in the protocol layer.

use crate::mcp::protocol::{McpRequest, McpResponse};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// Per-message deadline applied to stdio reads so a wedged server can't hang
/// the orchestrator forever (spec §4.4: "deadline-bound polling reads").
const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport trait for MCP communication
///
/// All transports must implement this trait, enabling the client
/// to work with different transport mechanisms (stdio, HTTP, etc).
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Send a request to the MCP server
    ///
    /// # Arguments
    ///
    /// * `request` - The MCP request to send
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the request was sent successfully
    async fn send(&mut self, request: &McpRequest) -> Result<()>;

    /// Receive a response from the MCP server
    ///
    /// # Returns
    ///
    /// Returns the MCP response, or an error if communication fails
    async fn recv(&mut self) -> Result<McpResponse>;

    /// Check if the transport is still connected
    fn is_connected(&self) -> bool;
}

/// stdio transport for local MCP servers
///
/// This transport spawns an MCP server as a child process and communicates
/// with it via stdin/stdout. Each line is a JSON-RPC message.
///
/// # Example
///
/// ```ignore
/// let transport = StdioTransport::spawn("npx", &["-y", "@modelcontextprotocol/server-filesystem"]);
/// transport.send(&request).await?;
/// let response = transport.recv().await?;
/// ```
pub struct StdioTransport {
    /// Child process handle
    child: Option<Child>,

    /// stdin handle for sending requests
    stdin: ChildStdin,

    /// stdout handle for receiving responses
    stdout: BufReader<ChildStdout>,

    /// Server command (for diagnostics)
    command: String,

    /// Whether the transport is still connected
    connected: bool,

    /// Reusable buffer for reading lines
    line_buffer: String,

    /// Per-message read deadline (spec §4.4)
    message_timeout: Duration,
}

impl StdioTransport {
    /// Spawn a new MCP server process and create a stdio transport
    ///
    /// # Arguments
    ///
    /// * `command` - The command to spawn (e.g., "npx", "python", "./server")
    /// * `args` - Arguments to pass to the command
    ///
    /// # Returns
    ///
    /// Returns a new `StdioTransport` instance
    ///
    /// # Example
    ///
    /// ```ignore
    /// let transport = StdioTransport::spawn(
    ///     "npx",
    ///     &["-y", "@modelcontextprotocol/server-filesystem", "/path/to/files"]
    /// ).await?;
    /// ```
    pub async fn spawn(command: &str, args: &[&str]) -> Result<Self> {
        Self::spawn_with_env(command, args, &std::collections::BTreeMap::new()).await
    }

    /// Spawn with additional environment variables merged into the child's
    /// environment (spec §3's `MCPServer.env` field, e.g. API keys a stdio
    /// server needs that shouldn't live in its `args`).
    pub async fn spawn_with_env(
        command: &str,
        args: &[&str],
        env: &std::collections::BTreeMap<String, String>,
    ) -> Result<Self> {
        Self::spawn_with_env_in_dir(command, args, env, None).await
    }

    /// Full-control spawn: environment overrides plus an optional working
    /// directory, used by the sidecar bridge so the wrapped process runs
    /// with `cwd` set to the project directory rather than the bridge's own.
    pub async fn spawn_with_env_in_dir(
        command: &str,
        args: &[&str],
        env: &std::collections::BTreeMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<Self> {
        tracing::info!("Spawning MCP server: {}", command);
        tracing::debug!("Server arguments: {:?}", args);

        // Spawn the child process with piped stdin/stdout
        let mut builder = Command::new(command);
        builder
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()); // Inherit stderr so we can see server logs
        if let Some(dir) = cwd {
            builder.current_dir(dir);
        }
        let mut child = builder.spawn().context("Failed to spawn MCP server process")?;

        // Get the stdin and stdout handles
        let stdin = child.stdin.take().context("Failed to get child stdin")?;
        let stdout = child.stdout.take().context("Failed to get child stdout")?;

        Ok(Self {
            child: Some(child),
            stdin,
            stdout: BufReader::new(stdout),
            command: format!("{} {}", command, args.join(" ")),
            connected: true,
            line_buffer: String::with_capacity(4096),
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
        })
    }

    /// Override the per-message read deadline (default 30s).
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.message_timeout = duration;
        self
    }

    /// Get the server command string (for diagnostics)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Write a request using Content-Length framing (spec §4.4's primary
    /// wire format; most MCP stdio servers speak this, not bare JSON lines).
    async fn write_framed(&mut self, json: &str) -> Result<()> {
        let body = json.as_bytes();
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.stdin
            .write_all(header.as_bytes())
            .await
            .context("Failed to write MCP header to stdin")?;
        self.stdin
            .write_all(body)
            .await
            .context("Failed to write MCP body to stdin")?;
        self.stdin
            .flush()
            .await
            .context("Failed to flush MCP server stdin")?;
        Ok(())
    }

    /// Read one message, accepting either Content-Length-framed bodies or a
    /// bare NDJSON line as a fallback, each read bounded by `message_timeout`.
    async fn read_framed(&mut self) -> Result<String> {
        let deadline = self.message_timeout;

        self.line_buffer.clear();
        let bytes_read = timeout(deadline, self.stdout.read_line(&mut self.line_buffer))
            .await
            .context("Timed out waiting for MCP header/line")?
            .context("Failed to read from MCP server stdout")?;
        if bytes_read == 0 {
            self.connected = false;
            anyhow::bail!("MCP server closed connection (EOF)");
        }

        let first_line = self.line_buffer.trim_end().to_string();
        if first_line.trim_start().starts_with('{') {
            // NDJSON fallback: the line itself is the full JSON message.
            return Ok(first_line);
        }

        let mut content_length: Option<usize> = None;
        if let Some((key, value)) = first_line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }

        loop {
            self.line_buffer.clear();
            let n = timeout(deadline, self.stdout.read_line(&mut self.line_buffer))
                .await
                .context("Timed out waiting for MCP headers")?
                .context("Failed to read MCP header line")?;
            if n == 0 {
                self.connected = false;
                anyhow::bail!("MCP server closed connection while reading headers");
            }
            let line = self.line_buffer.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
        }

        let content_length =
            content_length.context("MCP message missing Content-Length header")?;
        let mut body = vec![0u8; content_length];
        timeout(deadline, self.stdout.read_exact(&mut body))
            .await
            .context("Timed out waiting for MCP message body")?
            .context("Failed to read MCP message body")?;
        String::from_utf8(body).context("MCP message body was not valid UTF-8")
    }

    /// Kill the MCP server process
    ///
    /// This sends a SIGTERM signal to the child process and waits for it to exit.
    pub async fn kill(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            tracing::info!("Killing MCP server: {}", self.command);
            child
                .kill()
                .await
                .context("Failed to kill MCP server process")?;
            self.connected = false;
        }
        Ok(())
    }

    /// Wait for the MCP server process to exit
    ///
    /// This waits for the child process to exit naturally and returns the exit code.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .await
                .context("Failed to wait for MCP server process")?;
            self.connected = false;
            Ok(status.code())
        } else {
            Ok(None)
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Try to kill the child process when the transport is dropped
        if let Some(mut child) = self.child.take() {
            tracing::debug!("Dropping StdioTransport, killing MCP server");
            // Note: We can't await in Drop, so we just start the kill
            let _ = child.start_kill();
        }
    }
}

impl Transport for StdioTransport {
    /// Send a JSON-RPC request to the MCP server via stdin
    ///
    /// The request is serialized to JSON and written as a single line to stdin.
    async fn send(&mut self, request: &McpRequest) -> Result<()> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        // Serialize the request to JSON
        let json =
            serde_json::to_string(request).context("Failed to serialize MCP request to JSON")?;

        tracing::debug!("Sending to MCP server: {}", json);

        self.write_framed(&json).await
    }

    /// Receive a JSON-RPC response from the MCP server via stdout, accepting
    /// Content-Length framing or a bare NDJSON line, bounded by a deadline.
    async fn recv(&mut self) -> Result<McpResponse> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        let message = self.read_framed().await?;
        tracing::debug!("Received from MCP server: {}", message.trim());

        let response: McpResponse = serde_json::from_str(&message)
            .with_context(|| format!("Failed to deserialize MCP response from JSON: {message}"))?;

        Ok(response)
    }

    /// Check if the transport is still connected
    fn is_connected(&self) -> bool {
        self.connected && self.child.is_some()
    }
}
