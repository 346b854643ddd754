//! Line-delimited JSON-RPC 2.0 framing for the MCP subprocess variant
//! (spec §6, §4.9).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("JsonRpcRequest always serializes")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

pub fn parse_response_line(line: &str) -> Result<JsonRpcResponse, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
}

/// `tools/call` params: `{name, arguments}`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

/// Structured `tools/call` result payload. Grounded on spec §4.9's
/// extraction priority: structured payload first, else the first `text`
/// block parsed as JSON, else an empty defensive fallback.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallResult {
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub content: Vec<ToolCallContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Extract `{thread_id, text}` from a `tools/call` result per spec §4.9's
/// fallback chain: prefer `structured_content.thread_id` + joined text
/// blocks; else parse the first text block as JSON; else return empty
/// text with `existing_thread_id` unchanged.
pub fn extract_codex_response(
    result: &ToolCallResult,
    existing_thread_id: Option<&str>,
) -> (Option<String>, String) {
    if let Some(sc) = &result.structured_content {
        if let Some(tid) = sc.get("thread_id").and_then(|v| v.as_str()) {
            let text = result
                .content
                .iter()
                .filter_map(|b| match b {
                    ToolCallContentBlock::Text { text } => Some(text.as_str()),
                    ToolCallContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return (Some(tid.to_string()), text);
        }
    }

    if let Some(ToolCallContentBlock::Text { text }) = result.content.first() {
        if let Ok(v) = serde_json::from_str::<Value>(text) {
            let tid = v
                .get("thread_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or_else(|| existing_thread_id.map(|s| s.to_string()));
            let body = v
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| text.clone());
            return (tid, body);
        }
        return (
            existing_thread_id.map(|s| s.to_string()),
            text.clone(),
        );
    }

    (existing_thread_id.map(|s| s.to_string()), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_params_when_none() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let s = req.to_line();
        assert!(!s.contains("params"));
    }

    #[test]
    fn extract_prefers_structured_content() {
        let result = ToolCallResult {
            structured_content: Some(serde_json::json!({"thread_id": "abc"})),
            content: vec![ToolCallContentBlock::Text {
                text: "hello".into(),
            }],
        };
        let (tid, text) = extract_codex_response(&result, None);
        assert_eq!(tid.as_deref(), Some("abc"));
        assert_eq!(text, "hello");
    }

    #[test]
    fn extract_falls_back_to_first_text_block_json() {
        let result = ToolCallResult {
            structured_content: None,
            content: vec![ToolCallContentBlock::Text {
                text: r#"{"thread_id":"t2","text":"reply"}"#.into(),
            }],
        };
        let (tid, text) = extract_codex_response(&result, Some("old"));
        assert_eq!(tid.as_deref(), Some("t2"));
        assert_eq!(text, "reply");
    }

    #[test]
    fn extract_defensive_fallback_keeps_existing_thread_id() {
        let result = ToolCallResult::default();
        let (tid, text) = extract_codex_response(&result, Some("keep-me"));
        assert_eq!(tid.as_deref(), Some("keep-me"));
        assert_eq!(text, "");
    }
}
