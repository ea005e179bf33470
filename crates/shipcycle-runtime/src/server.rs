//! Daemon control socket.
//! Connection-per-request, newline-delimited JSON-RPC (see [`crate::rpc`]).

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use shipcycle_core::queue::JobRequest;
use shipcycle_daemon::Orchestrator;

use crate::rpc::{
    INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, RpcError, RpcRequest, RpcResponse, read_frame,
    write_frame,
};

const DEFAULT_LIST_LIMIT: usize = 10;

/// Serve the control socket until the task is dropped.
pub async fn run_server(socket_path: &str, orch: Arc<Orchestrator>) -> anyhow::Result<()> {
    let listener = bind(socket_path).await?;
    tracing::info!(socket = %socket_path, "control socket listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let orch = Arc::clone(&orch);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, orch).await {
                tracing::debug!(error = %e, "control connection dropped");
            }
        });
    }
}

/// Claim `socket_path` for this daemon.
///
/// The parent directory is private to the user and the socket itself is
/// 0600. A leftover socket nobody answers on is replaced; a live one means
/// another daemon owns the state directory.
async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let path = Path::new(socket_path);
    let dir = path
        .parent()
        .with_context(|| format!("socket path {socket_path} has no parent directory"))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("cannot create socket directory {}", dir.display()))?;
    restrict(dir, 0o700).await?;

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if UnixStream::connect(path).await.is_ok() {
            anyhow::bail!("a shipcycle daemon is already listening on {socket_path}");
        }
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("cannot remove stale socket {socket_path}"))?;
        tracing::info!(socket = %socket_path, "replaced stale socket");
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("cannot listen on {socket_path}"))?;
    restrict(path, 0o600).await?;
    Ok(listener)
}

async fn restrict(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("cannot set mode {mode:o} on {}", path.display()))
}

async fn handle_connection(stream: UnixStream, orch: Arc<Orchestrator>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let Some(frame) = read_frame(&mut BufReader::new(reader)).await? else {
        return Ok(());
    };

    let response = match serde_json::from_str::<RpcRequest>(frame.trim()) {
        Ok(request) => {
            let outcome = dispatch(&orch, &request.method, &request.params).await;
            if let Err(e) = &outcome {
                tracing::debug!(method = %request.method, code = e.code, message = %e.message, "request refused");
            }
            RpcResponse::reply(request.id, outcome)
        }
        Err(e) => RpcResponse::reply(Value::Null, Err(RpcError::new(PARSE_ERROR, e.to_string()))),
    };
    write_frame(&mut writer, &response).await
}

/// Deserialize `params`, treating a missing value as an empty object.
fn params<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    let value = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
}

#[derive(serde::Deserialize)]
#[serde(default)]
struct LimitParams {
    limit: usize,
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Default, serde::Deserialize)]
#[serde(default)]
struct OverrideParams {
    signal_id: Option<String>,
}

pub(crate) async fn dispatch(
    orch: &Orchestrator,
    method: &str,
    raw: &Value,
) -> Result<Value, RpcError> {
    let result = match method {
        "get_state" => serde_json::to_value(orch.state().await?)?,
        "get_queue_state" => serde_json::to_value(orch.queue_state().await?)?,
        "enqueue_run" => {
            let request: JobRequest = params(raw)?;
            serde_json::to_value(orch.enqueue_run(request).await?)?
        }
        "enqueue_detection" => {
            let request: JobRequest = params(raw)?;
            serde_json::to_value(orch.enqueue_detection(request).await?)?
        }
        "pause" => serde_json::to_value(orch.pause().await?)?,
        "resume" => serde_json::to_value(orch.resume().await?)?,
        "set_override" => {
            let p: OverrideParams = params(raw)?;
            serde_json::to_value(orch.set_override(p.signal_id).await?)?
        }
        "clear_queue" => serde_json::json!({ "cleared": orch.clear_queue().await? }),
        "recent_drops" => {
            let p: LimitParams = params(raw)?;
            serde_json::to_value(orch.recent_drops(p.limit).await?)?
        }
        "trend_pool" => {
            let p: LimitParams = params(raw)?;
            serde_json::to_value(orch.trend_pool(p.limit).await?)?
        }
        _ => return Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    };
    Ok(result)
}

// ─── Tests ────────────────────────────────────────────────────────
