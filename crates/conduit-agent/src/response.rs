//! Outgoing-content rendering and response parsing (spec §4.11 steps 2 and
//! 4). Grounded on `skynet-agent/src/pipeline/process.rs`'s fenced-block
//! scanning for tool calls embedded in model text, generalized to the two
//! fence tags spec §6 names (`tool_call`, `js`/`javascript`).

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use conduit_core::types::ContentBlock;
use conduit_core::error::ErrorCode;
use conduit_core::CoreError;
use regex::Regex;
use serde_json::Value;

/// Resolved file-attachment extension from a MIME type, falling back to
/// `bin` for anything unrecognised.
fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// Decode `data` and write it under `sandbox_dir/attachments/`, returning
/// the path the agent is told to `Read`.
///
/// `ContentBlock::Image`/`Document` in this implementation only ever carry
/// base64 data — there's no separate local-path variant — so every
/// attachment is materialised to the sandbox the same way regardless of
/// how it arrived.
async fn write_attachment(sandbox_dir: &Path, media_type: &str, data: &str) -> Result<PathBuf, CoreError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| CoreError::classified(ErrorCode::InvalidResponse, format!("invalid base64 attachment: {e}")))?;

    let dir = sandbox_dir.join("attachments");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| CoreError::classified(ErrorCode::ToolError, format!("failed to create attachments dir: {e}")))?;

    let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(media_type));
    let path = dir.join(filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| CoreError::classified(ErrorCode::ToolError, format!("failed to write attachment: {e}")))?;
    Ok(path)
}

/// Render the last user message's content blocks into the flat text sent
/// to the subprocess (spec §4.11 step 2).
pub async fn render_outgoing_text(blocks: &[ContentBlock], sandbox_dir: &Path) -> Result<String, CoreError> {
    let mut rendered = Vec::with_capacity(blocks.len());
    for block in blocks {
        let piece = match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { media_type, base64 } => {
                let path = write_attachment(sandbox_dir, media_type, base64).await?;
                format!("[The user attached an image. Read the file at {} to view it.]", path.display())
            }
            ContentBlock::Document { media_type, base64 } => {
                let path = write_attachment(sandbox_dir, media_type, base64).await?;
                format!("[The user attached a document. Read the file at {} to view it.]", path.display())
            }
            ContentBlock::ToolUse { id, name, input } => {
                format!("[prior tool_use {name} ({id}) input={input}]")
            }
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                format!("[tool_result {tool_use_id} is_error={is_error}] {content}")
            }
        };
        rendered.push(piece);
    }
    Ok(rendered.join("\n\n"))
}

fn tool_call_fence_regex() -> Regex {
    Regex::new(r"(?s)```(tool_call|js|javascript)\s*\n(.*?)```").unwrap()
}

/// Gateway-tools-mode parsing (spec §4.11 step 4, §6): strip fenced
/// `tool_call`/`js`/`javascript` blocks out of `text`, turning each into a
/// synthesised `ContentBlock::ToolUse`. Returns the remaining prose and the
/// extracted tool calls, in the order they appeared.
pub fn extract_gateway_tool_calls(text: &str, code_act_enabled: bool) -> (String, Vec<ContentBlock>) {
    let fence = tool_call_fence_regex();
    let mut blocks = Vec::new();
    let mut counter = 0u32;

    let stripped = fence.replace_all(text, |caps: &regex::Captures| {
        let tag = &caps[1];
        let body = caps[2].trim();
        if tag == "tool_call" {
            if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                let name = parsed.get("name").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                let input = parsed.get("input").cloned().unwrap_or(Value::Null);
                counter += 1;
                blocks.push(ContentBlock::ToolUse { id: format!("call_{counter}"), name, input });
            } else {
                tracing::warn!(body, "malformed tool_call fenced block, dropping");
            }
        } else if code_act_enabled {
            counter += 1;
            blocks.push(ContentBlock::ToolUse {
                id: format!("call_{counter}"),
                name: "code_act".to_string(),
                input: serde_json::json!({ "code": body }),
            });
        }
        String::new()
    });

    (stripped.trim().to_string(), blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_text_block_verbatim() {
        let blocks = vec![ContentBlock::text("hello there")];
        let dir = std::env::temp_dir().join(format!("conduit_agent_test_{}", uuid::Uuid::new_v4()));
        let text = render_outgoing_text(&blocks, &dir).await.unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn materialises_base64_image_and_references_path() {
        let dir = std::env::temp_dir().join(format!("conduit_agent_test_{}", uuid::Uuid::new_v4()));
        let data = BASE64.encode(b"not really a png");
        let blocks = vec![ContentBlock::Image { media_type: "image/png".to_string(), base64: data }];
        let text = render_outgoing_text(&blocks, &dir).await.unwrap();
        assert!(text.contains("Read the file at"));
        assert!(text.contains("attachments"));
        assert!(text.ends_with(".png]"));
    }

    #[tokio::test]
    async fn renders_tool_result_as_labelled_summary() {
        let dir = std::env::temp_dir().join(format!("conduit_agent_test_{}", uuid::Uuid::new_v4()));
        let blocks = vec![ContentBlock::ToolResult {
            tool_use_id: "t1".to_string(),
            content: "ok".to_string(),
            is_error: false,
        }];
        let text = render_outgoing_text(&blocks, &dir).await.unwrap();
        assert!(text.contains("tool_result t1"));
        assert!(text.contains("ok"));
    }

    #[test]
    fn extracts_tool_call_block_and_strips_from_prose() {
        let text = "Here's what I'll do.\n```tool_call\n{\"name\": \"Read\", \"input\": {\"path\": \"a.rs\"}}\n```\nDone.";
        let (prose, calls) = extract_gateway_tool_calls(text, false);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            ContentBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "Read");
                assert_eq!(input["path"], "a.rs");
            }
            _ => panic!("expected ToolUse"),
        }
        assert!(!prose.contains("tool_call"));
        assert!(prose.contains("Here's what I'll do."));
        assert!(prose.contains("Done."));
    }

    #[test]
    fn code_act_block_only_extracted_when_enabled() {
        let text = "```js\nconsole.log('hi')\n```";
        let (_, calls) = extract_gateway_tool_calls(text, false);
        assert!(calls.is_empty());

        let (_, calls) = extract_gateway_tool_calls(text, true);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            ContentBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "code_act");
                assert!(input["code"].as_str().unwrap().contains("console.log"));
            }
            _ => panic!("expected ToolUse"),
        }
    }

    #[test]
    fn no_fenced_blocks_returns_text_unchanged() {
        let (prose, calls) = extract_gateway_tool_calls("just plain text", false);
        assert_eq!(prose, "just plain text");
        assert!(calls.is_empty());
    }
}
