//! Newline-delimited JSON-RPC 2.0 tool protocol.
//!
//! One request per line in, one response per line out. Requests are handled
//! concurrently, so responses may be written in a different order than the
//! requests arrived; clients correlate them by `id`. Notifications (requests
//! without an `id`) get no response.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::kernel::ToolAdapter;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const STATUS_RESOURCE_URI: &str = "firecrawl://status";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

pub struct ToolServer {
    adapter: Arc<ToolAdapter>,
    api_url: String,
    deployment: &'static str,
}

impl ToolServer {
    pub fn new(adapter: Arc<ToolAdapter>, config: &Config) -> Self {
        Self {
            adapter,
            api_url: config.api_url.clone(),
            deployment: config.deployment_label(),
        }
    }

    /// Handle one raw request line. `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable request");
                return Some(error_response(Value::Null, RpcError::new(PARSE_ERROR, "Parse error")));
            }
        };
        let request: RpcRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                return Some(error_response(
                    Value::Null,
                    RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
                ))
            }
        };

        tracing::debug!(method = %request.method, "Request received");
        let outcome = self.dispatch(&request.method, request.params).await;
        let id = request.id?;
        Some(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => error_response(id, error),
        })
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}},
                "serverInfo": {"name": "firecrawl-relay", "version": env!("CARGO_PKG_VERSION")},
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": ToolAdapter::catalogue() })),
            "tools/call" => {
                let params: CallParams = serde_json::from_value(params)
                    .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
                Ok(self.call_tool(&params.name, params.arguments).await)
            }
            "resources/list" => Ok(json!({
                "resources": [{
                    "uri": STATUS_RESOURCE_URI,
                    "name": "Firecrawl Relay Status",
                    "description": "Current status of the relay and the deployment it talks to",
                    "mimeType": "application/json",
                }]
            })),
            "resources/read" => {
                let params: ReadParams = serde_json::from_value(params)
                    .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
                self.read_resource(&params.uri)
            }
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }

    /// Tool failures are reported inside the result, not as protocol errors.
    async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        match self.adapter.invoke(name, arguments).await {
            Ok(output) => {
                let mut result = json!({"content": [{"type": "text", "text": output.text}]});
                if let Some(operation_id) = output.operation_id {
                    result["_meta"] = json!({ "operationId": operation_id });
                }
                result
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool call failed");
                json!({
                    "content": [{"type": "text", "text": format!("Error: {}", e)}],
                    "isError": true,
                })
            }
        }
    }

    fn read_resource(&self, uri: &str) -> Result<Value, RpcError> {
        if uri != STATUS_RESOURCE_URI {
            return Err(RpcError::new(
                INVALID_PARAMS,
                format!("Unknown resource: {}", uri),
            ));
        }
        let status = json!({
            "service": "Firecrawl Relay",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "apiUrl": self.api_url,
            "deployment": self.deployment,
            "timestamp": Utc::now().to_rfc3339(),
        });
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": status.to_string(),
            }]
        }))
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`.
    /// Returns once every in-flight request has been answered.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        let read = async move {
            let mut lines = reader.lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let server = Arc::clone(&self);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.handle_line(&line).await {
                        let _ = tx.send(response);
                    }
                });
            }
            Ok::<(), std::io::Error>(())
        };

        let write = async {
            while let Some(response) = rx.recv().await {
                let mut bytes = serde_json::to_vec(&response)?;
                bytes.push(b'\n');
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
            Ok::<(), anyhow::Error>(())
        };

        let (read_result, write_result) = tokio::join!(read, write);
        read_result.context("Failed to read request stream")?;
        write_result.context("Failed to write response stream")?;
        tracing::info!("Input closed, server stopping");
        Ok(())
    }
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": error})
}
