// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Minimal JSON-RPC 2.0 envelope for the AI tool surface's stdio
//! transport (§4.9). One JSON value per line, matching how line-oriented
//! stdio JSON-RPC transports are framed elsewhere in this ecosystem --
//! no `Content-Length` header, just newline-delimited objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, result: Some(result), error: None }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub mod error_code {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Structured user/tool errors per §7 (invalid decode id, QSO already
    /// active, backend disconnected) -- distinct from the reserved range.
    pub const APPLICATION_ERROR: i32 = -32000;
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(error_code::APPLICATION_ERROR, message)
    }
}

/// A one-way server → client push, e.g. `notifications/resources/updated`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, method: method.into(), params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_tool_call_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"call_cq","arguments":{}}}"#;
        let req: Request = serde_json::from_str(line).unwrap();
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.id, Some(Value::from(1)));
    }

    #[test]
    fn response_omits_error_field_when_ok() {
        let resp = Response::ok(Value::from(1), serde_json::json!({"status": "ok"}));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("result").is_some());
    }
}
