//! Control-socket client behind the CLI subcommands.

use anyhow::Context;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::rpc::{RpcRequest, RpcResponse, read_frame, write_frame};

/// Send one request to the daemon and return its result payload.
pub(crate) async fn rpc_call(socket_path: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("cannot connect to daemon at {socket_path} (is `shipcycle daemon` running?)"))?;
    let (reader, mut writer) = stream.into_split();

    write_frame(&mut writer, &RpcRequest::new(method, params)).await?;
    let frame = read_frame(&mut BufReader::new(reader))
        .await?
        .with_context(|| format!("daemon closed the connection without answering {method}"))?;
    let response: RpcResponse = serde_json::from_str(frame.trim())
        .with_context(|| format!("unreadable reply to {method}"))?;

    response
        .into_result()
        .map_err(|e| anyhow::anyhow!("daemon rejected {method}: {} ({})", e.message, e.code))
}

/// Call `method` and pretty-print the result.
pub async fn cmd_print(socket_path: &str, method: &str, params: Value) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `shipcycle status`: human-readable agent state.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let state = rpc_call(socket_path, "get_state", Value::Null).await?;
    let queue = rpc_call(socket_path, "get_queue_state", Value::Null).await?;
    print!("{}", format_status(&state, &queue));
    Ok(())
}

/// Run a state-changing `method`, then show the resulting status.
pub async fn cmd_status_after(socket_path: &str, method: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, method, Value::Null).await?;
    cmd_status(socket_path).await
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Pure formatting logic for status output, separated for testability.
pub(crate) fn format_status(state: &Value, queue: &Value) -> String {
    let mut out = String::new();
    let phase = field(state, "current_phase").unwrap_or("idle");
    let paused = state["paused"].as_bool().unwrap_or(false);
    out.push_str(&format!(
        "phase:     {phase}{}\n",
        if paused { " (paused)" } else { "" }
    ));

    if let Some(run_id) = field(state, "last_run_id") {
        out.push_str(&format!("last run:  {run_id}\n"));
    }
    if let Some(result) = field(state, "last_result") {
        let at = field(state, "last_run_at").unwrap_or("-");
        out.push_str(&format!("result:    {result} at {at}\n"));
    }
    if let Some(error) = field(state, "last_error") {
        out.push_str(&format!("error:     {error}\n"));
    }
    if let Some(reason) = field(state, "last_skip_reason") {
        out.push_str(&format!("skipped:   {reason}\n"));
    }
    if let Some(result) = field(state, "last_signal_result") {
        let at = field(state, "last_signal_at").unwrap_or("-");
        out.push_str(&format!("detection: {result} at {at}\n"));
    }
    if let Some(id) = field(state, "override_signal_id") {
        out.push_str(&format!("override:  {id}\n"));
    }

    let queued = queue["items"].as_array().map_or(0, Vec::len);
    match queue["active"]["item"]["id"].as_str() {
        Some(active) => out.push_str(&format!("queue:     {queued} queued, running {active}\n")),
        None => out.push_str(&format!("queue:     {queued} queued\n")),
    }
    out
}
