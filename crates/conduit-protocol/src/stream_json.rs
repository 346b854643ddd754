//! Newline-delimited JSON framing for the stream-json subprocess variant
//! (spec §6, §4.8). Grounded on `skynet-protocol/src/frames.rs`'s
//! tagged-enum request/response/event shapes, adapted to this wire schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound: `{type:"user", message:{role:"user", content: <string> | [block, …]}}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundUserFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub role: &'static str,
    pub content: OutboundContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundContent {
    Text(String),
    Blocks(Vec<OutboundBlock>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundBlock {
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl OutboundUserFrame {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            frame_type: "user",
            message: OutboundMessage {
                role: "user",
                content: OutboundContent::Text(content.into()),
            },
        }
    }

    pub fn tool_results(results: Vec<OutboundBlock>) -> Self {
        Self {
            frame_type: "user",
            message: OutboundMessage {
                role: "user",
                content: OutboundContent::Blocks(results),
            },
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("OutboundUserFrame always serializes")
    }
}

/// Inbound event discriminated on `type` (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    System {
        subtype: String,
        #[serde(flatten)]
        extra: Value,
    },
    Assistant {
        message: AssistantMessage,
    },
    Result {
        subtype: String,
        result: Option<String>,
        session_id: Option<String>,
        total_cost_usd: Option<f64>,
        duration_ms: Option<u64>,
        usage: Option<UsageWire>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageWire {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Parse one complete line as an inbound event. Malformed lines are surfaced
/// to the caller rather than silently dropped, so the subprocess driver can
/// decide whether to treat them as a protocol error.
pub fn parse_line(line: &str) -> Result<InboundEvent, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// State-free line splitter (spec §9: "a state-free function from
/// `(buffer, new_bytes) -> (events, new_buffer)`"). Appends `new_bytes` to
/// `buffer`, splits on `\n`, parses each complete line, and returns the
/// parsed events plus the remaining partial line. Lines that fail to parse
/// are reported as `Err` entries rather than dropped.
pub fn feed(buffer: &mut String, new_bytes: &str) -> Vec<Result<InboundEvent, serde_json::Error>> {
    buffer.push_str(new_bytes);
    let mut events = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        events.push(parse_line(trimmed));
    }
    events
}

/// Lone UTF-16 surrogate code units are not valid standalone Unicode
/// scalars, so Rust's `String` cannot contain them directly; real-world
/// sources (e.g. chat gateways re-encoding from UTF-16) sometimes produce
/// replacement-character artifacts that downstream APIs reject. We strip
/// the Unicode replacement character (`U+FFFD`), the usual trace a decoder
/// leaves behind for an unpaired surrogate, which is idempotent by
/// construction.
pub fn strip_lone_surrogates(input: &str) -> String {
    input.chars().filter(|c| *c != '\u{FFFD}').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_text_frame_shape() {
        let frame = OutboundUserFrame::text("hello");
        let json: Value = serde_json::from_str(&frame.to_line()).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["message"]["role"], "user");
        assert_eq!(json["message"]["content"], "hello");
    }

    #[test]
    fn outbound_tool_result_batch() {
        let frame = OutboundUserFrame::tool_results(vec![
            OutboundBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "ok".into(),
                is_error: false,
            },
            OutboundBlock::ToolResult {
                tool_use_id: "t2".into(),
                content: "denied".into(),
                is_error: true,
            },
        ]);
        let json: Value = serde_json::from_str(&frame.to_line()).unwrap();
        assert!(json["message"]["content"].is_array());
        assert_eq!(json["message"]["content"][1]["is_error"], true);
    }

    #[test]
    fn parses_assistant_tool_use_event() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"Read","input":{"path":"a"}}]}}"#;
        let ev = parse_line(line).unwrap();
        match ev {
            InboundEvent::Assistant { message } => {
                assert_eq!(message.content.len(), 2);
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn feed_splits_on_newlines_and_buffers_partial() {
        let mut buf = String::new();
        let events = feed(&mut buf, "{\"type\":\"error\",\"error\":\"boom\"}\n{\"type\":\"res");
        assert_eq!(events.len(), 1);
        assert_eq!(buf, "{\"type\":\"res");
        let events2 = feed(
            &mut buf,
            "ult\",\"subtype\":\"success\",\"result\":\"ok\"}\n",
        );
        assert_eq!(events2.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn surrogate_strip_is_idempotent() {
        let x = "hello\u{FFFD}world";
        let once = strip_lone_surrogates(x);
        let twice = strip_lone_surrogates(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "helloworld");
    }
}
