//! Sidecar bridge (spec §4.4): a process-local HTTP server that adapts a
//! wrapped stdio MCP subprocess into `GET /health` + `POST /mcp`.
//!
//! Runs as its own process, invoked via the `mcp-sidecar-bridge` CLI
//! subcommand whose arguments are constructed by
//! [`crate::mcp::sidecar::SidecarManager`]'s bridge launch mode. Grounded in
//! `metrics_server.rs`'s axum server pattern; the `POST /mcp` forwarding
//! loop is new, since spec §4.4 requires id-matching that tolerates stray
//! messages from the wrapped process, which `McpClient::send_request`
//! (built for a single in-process caller with its own id counter) does not
//! provide.

use crate::mcp::protocol::{McpError, McpRequest, McpResponse};
use crate::mcp::transport::{StdioTransport, Transport};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, error, info, warn};

/// Bounded so a wedged wrapped process can't make the bridge spin forever
/// skipping stray messages (spec §4.4: "the reader loop ignores any
/// message whose id does not match").
const MAX_STRAY_MESSAGES: usize = 32;

struct BridgeState {
    name: String,
    transport: Mutex<StdioTransport>,
    request_timeout: Duration,
}

/// Start the bridge: spawn `command` with `cwd`, perform a one-time MCP
/// `initialize` handshake, then serve `GET /health` and `POST /mcp` on
/// `host:port` until the process is killed.
pub async fn serve(
    name: String,
    host: String,
    port: u16,
    command: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
) -> Result<()> {
    let (cmd, args) = command
        .split_first()
        .context("wrapped command for sidecar bridge must not be empty")?;
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    info!("Sidecar bridge '{}' spawning wrapped command: {}", name, cmd);
    let mut transport = StdioTransport::spawn_with_env_in_dir(
        cmd,
        &arg_refs,
        &BTreeMap::new(),
        Some(cwd.as_path()),
    )
    .await
    .with_context(|| format!("failed to spawn wrapped MCP process for sidecar '{name}'"))?;
    transport = transport.with_timeout(timeout);

    handshake(&mut transport, timeout)
        .await
        .with_context(|| format!("sidecar '{name}' failed its initialize handshake"))?;

    let state = Arc::new(BridgeState {
        name: name.clone(),
        transport: Mutex::new(transport),
        request_timeout: timeout,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_handler))
        .with_state(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind sidecar bridge to {addr}"))?;

    info!("Sidecar bridge '{}' listening on {}", name, addr);
    axum::serve(listener, app)
        .await
        .context("sidecar bridge server error")?;
    Ok(())
}

async fn handshake(transport: &mut StdioTransport, deadline: Duration) -> Result<()> {
    let request = McpRequest::new(
        1,
        "initialize",
        Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "builder-sidecar-bridge", "version": env!("CARGO_PKG_VERSION")},
        })),
    );
    transport.send(&request).await.context("failed to send initialize request")?;
    let response = tokio_timeout(deadline, transport.recv())
        .await
        .context("timed out waiting for initialize response")??;
    if !response.is_success() {
        anyhow::bail!("wrapped process rejected initialize handshake: {:?}", response.error);
    }
    Ok(())
}

async fn health_handler(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    Json(json!({"ok": true, "name": state.name}))
}

async fn mcp_handler(State(state): State<Arc<BridgeState>>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("sidecar bridge '{}' received invalid JSON body: {}", state.name, e);
            return bridge_error(0, "invalid JSON-RPC request body");
        }
    };

    let request: McpRequest = match serde_json::from_value(raw.clone()) {
        Ok(r) => r,
        Err(e) => {
            warn!("sidecar bridge '{}' received malformed request: {}", state.name, e);
            let id = raw.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
            return bridge_error(id, "invalid JSON-RPC request body");
        }
    };

    match forward(&state, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!("sidecar bridge '{}' forward failed: {}", state.name, e);
            bridge_error(request.id, &e.to_string())
        }
    }
}

/// Send `request` to the wrapped process and read responses until one
/// matches its id, skipping any stray messages in between (spec §4.4).
async fn forward(state: &BridgeState, request: &McpRequest) -> Result<McpResponse> {
    let mut transport = state.transport.lock().await;
    transport.send(request).await.context("failed to forward request to wrapped process")?;

    for _ in 0..MAX_STRAY_MESSAGES {
        let response = tokio_timeout(state.request_timeout, transport.recv())
            .await
            .context("timed out waiting for wrapped process response")?
            .context("failed to read response from wrapped process")?;
        if response.id == request.id {
            return Ok(response);
        }
        debug!(
            "sidecar bridge '{}' skipping stray response id={} (expected {})",
            state.name, response.id, request.id
        );
    }
    anyhow::bail!("gave up after {} stray responses without an id match", MAX_STRAY_MESSAGES);
}

fn bridge_error(id: u64, message: &str) -> Response {
    let response = McpResponse::err(id, McpError::new(-32000, message));
    (StatusCode::OK, Json(response)).into_response()
}
