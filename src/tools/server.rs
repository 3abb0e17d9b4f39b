//! Stateless JSON-RPC tool server: `POST /rpc` and `GET /health`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ToolRegistry;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Error, PartialEq)]
pub enum RpcError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Tool failed: {0}")]
    ToolFailed(String),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::ToolFailed(_) => -32000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl RpcResponse {
    fn from_result(id: Value, result: Result<Value, RpcError>) -> Self {
        let (result, error) = match result {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(ErrorObject { code: e.code(), message: e.to_string() })),
        };
        Self { jsonrpc: "2.0".into(), id, result, error }
    }
}

#[derive(Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn call_tool(registry: &ToolRegistry, params: Value) -> Result<Value, RpcError> {
    let params: CallParams =
        serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
    let tool = registry
        .get(&params.name)
        .ok_or_else(|| RpcError::InvalidParams(format!("unknown tool: {}", params.name)))?;
    let args = if params.arguments.is_null() { json!({}) } else { params.arguments };
    tool.call(&args).map_err(|e| RpcError::ToolFailed(format!("{e:#}")))
}

/// Routes one request to its method. Never fails at the transport level.
pub fn dispatch(registry: &ToolRegistry, req: RpcRequest) -> RpcResponse {
    debug!(method = %req.method, id = %req.id, "rpc request");
    let result = match req.method.as_str() {
        "tools/list" => Ok(json!({ "tools": registry.list() })),
        "tools/call" => call_tool(registry, req.params),
        other => Err(RpcError::MethodNotFound(other.to_string())),
    };
    if let Err(e) = &result {
        warn!(code = e.code(), error = %e, "rpc error");
    }
    RpcResponse::from_result(req.id, result)
}

async fn rpc(
    State(registry): State<Arc<ToolRegistry>>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    Json(dispatch(&registry, req))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(registry: Arc<ToolRegistry>) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .with_state(registry)
}

pub async fn serve(addr: SocketAddr, registry: Arc<ToolRegistry>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding tool server to {addr}"))?;
    info!(%addr, tools = registry.list().len(), "tool server listening");
    axum::serve(listener, router(registry)).await.context("tool server stopped")?;
    Ok(())
}
