//! 远程工具协议：JSON-RPC 2.0 报文与工具描述
//!
//! 三种传输共用同一套报文：管道按行分隔，HTTP 一次 POST 一对，事件流从 SSE
//! 收响应。请求/响应用 id 配对，乱序完成没问题，串线不行。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// 协议方法名
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// error 字段优先；否则取 result（缺省为 null）
    pub fn into_result(self) -> Result<Value, super::BridgeError> {
        match self.error {
            Some(err) => Err(super::BridgeError::Remote(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// 远端返回的错误对象
#[derive(Clone, Debug, Serialize, Deserialize, Error)]
#[error("remote error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// tools/list 返回的单个工具描述
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 参数 JSON Schema；兼容 input_schema 命名
    #[serde(default, alias = "input_schema")]
    pub parameters: Value,
}

/// tools/call 的结果载荷
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteCallResult {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    /// 结构化侧信道，原样进入 ToolResult.info
    #[serde(default)]
    pub info: Value,
}

impl RemoteCallResult {
    /// 从 result 值解析；裸字符串按纯文本内容处理
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(content) => Self {
                content,
                ..Self::default()
            },
            other => serde_json::from_value(other).unwrap_or_default(),
        }
    }
}

/// 从 SSE 字节流缓冲中取出完整事件的 data 载荷（事件以空行分隔）
pub fn drain_sse_events(buffer: &mut String) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .collect();
        if !data.is_empty() {
            events.push(data.join("\n"));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_jsonrpc_fields() {
        let req = RpcRequest::new(3, METHOD_LIST_TOOLS, Value::Null);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 3);
        assert_eq!(json["method"], "tools/list");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_response_error_wins_over_result() {
        let resp: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"x":1},"error":{"code":-32000,"message":"busy"}}"#,
        )
        .unwrap();
        assert!(resp.into_result().is_err());
    }

    #[test]
    fn test_descriptor_accepts_input_schema_alias() {
        let d: RemoteToolDescriptor = serde_json::from_str(
            r#"{"name":"submit","description":"submit a job","input_schema":{"type":"object"}}"#,
        )
        .unwrap();
        assert_eq!(d.parameters["type"], "object");
    }

    #[test]
    fn test_call_result_from_bare_string() {
        let r = RemoteCallResult::from_value(Value::String("plain output".to_string()));
        assert_eq!(r.content, "plain output");
        assert!(!r.is_error);
    }

    #[test]
    fn test_drain_sse_events_handles_partial_frames() {
        let mut buffer = String::new();
        buffer.push_str("data: {\"id\":1}\n\ndata: {\"id\"");
        let events = drain_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"id\":1}"]);
        assert_eq!(buffer, "data: {\"id\"");

        buffer.push_str(":2}\n\n");
        let events = drain_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"id\":2}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_sse_events_joins_multiline_data() {
        let mut buffer = "data: line one\ndata: line two\n\n".to_string();
        let events = drain_sse_events(&mut buffer);
        assert_eq!(events, vec!["line one\nline two"]);
    }
}
