//! `ToolExecutor` — the C4 dispatcher. Holds the fixed `VALID_TOOLS` set
//! (spec §6) and routes a named invocation to its concrete handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::bash::{self, BashOptions};
use crate::facades::{BrowserFacade, GatewayFacade};
use crate::memory::MemoryStore;
use crate::ToolResult;

/// Exhaustive tool catalogue (spec §6).
pub const VALID_TOOLS: &[&str] = &[
    "mem_search",
    "mem_save",
    "mem_update",
    "mem_load_checkpoint",
    "Read",
    "Write",
    "Bash",
    "discord_send",
    "browser_navigate",
    "browser_screenshot",
    "browser_click",
    "browser_type",
    "browser_get_text",
    "browser_scroll",
    "browser_wait_for",
    "browser_evaluate",
    "browser_pdf",
    "browser_close",
];

#[derive(Debug, thiserror::Error)]
pub enum ToolExecError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub struct ToolExecutor {
    sandbox_dir: PathBuf,
    memory: Arc<dyn MemoryStore>,
    gateway: Arc<dyn GatewayFacade>,
    browser: Arc<dyn BrowserFacade>,
    bash_timeout: Duration,
    bash_max_output_bytes: usize,
}

impl ToolExecutor {
    pub fn new(
        sandbox_dir: impl Into<PathBuf>,
        memory: Arc<dyn MemoryStore>,
        gateway: Arc<dyn GatewayFacade>,
        browser: Arc<dyn BrowserFacade>,
    ) -> Self {
        Self {
            sandbox_dir: sandbox_dir.into(),
            memory,
            gateway,
            browser,
            bash_timeout: Duration::from_secs(60),
            bash_max_output_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_bash_limits(mut self, timeout: Duration, max_output_bytes: usize) -> Self {
        self.bash_timeout = timeout;
        self.bash_max_output_bytes = max_output_bytes;
        self
    }

    /// Dispatch one named tool invocation (spec §4.4). Returns
    /// `Err(UnknownTool)` only for names outside `VALID_TOOLS`; every known
    /// tool always returns `Ok(ToolResult)` even on failure
    /// (`success: false`), matching "handlers never throw across the
    /// boundary".
    pub async fn execute(&self, name: &str, input: Value) -> Result<ToolResult, ToolExecError> {
        if !VALID_TOOLS.contains(&name) {
            return Err(ToolExecError::UnknownTool(name.to_string()));
        }

        let result = match name {
            "mem_search" => self.mem_search(&input).await,
            "mem_save" => self.mem_save(&input).await,
            "mem_update" => self.mem_update(&input).await,
            "mem_load_checkpoint" => self.mem_load_checkpoint(&input).await,
            "Read" => self.read_file(&input).await,
            "Write" => self.write_file(&input).await,
            "Bash" => self.bash(&input).await,
            "discord_send" => self.discord_send(&input).await,
            "browser_navigate" => self.browser_call(&input, |b, arg| b.navigate(arg)).await,
            "browser_screenshot" => self.browser_noarg(|b| b.screenshot()).await,
            "browser_click" => self.browser_call(&input, |b, arg| b.click(arg)).await,
            "browser_type" => self.browser_type(&input).await,
            "browser_get_text" => self.browser_call(&input, |b, arg| b.get_text(arg)).await,
            "browser_scroll" => self.browser_scroll(&input).await,
            "browser_wait_for" => self.browser_call(&input, |b, arg| b.wait_for(arg)).await,
            "browser_evaluate" => self.browser_call(&input, |b, arg| b.evaluate(arg)).await,
            "browser_pdf" => self.browser_noarg(|b| b.pdf()).await,
            "browser_close" => match self.browser.close().await {
                Ok(()) => ToolResult::success_text("closed"),
                Err(e) => ToolResult::error(e),
            },
            _ => unreachable!("name already validated against VALID_TOOLS"),
        };

        Ok(result)
    }

    async fn mem_search(&self, input: &Value) -> ToolResult {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: query");
        };
        let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        match self.memory.search(query, limit).await {
            Ok(hits) => ToolResult::success(serde_json::json!({
                "hits": hits.iter().map(|h| serde_json::json!({
                    "topic": h.topic, "decision": h.decision, "confidence": h.confidence
                })).collect::<Vec<_>>()
            })),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn mem_save(&self, input: &Value) -> ToolResult {
        let (Some(topic), Some(decision)) = (
            input.get("topic").and_then(|v| v.as_str()),
            input.get("decision").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("missing required parameters: topic, decision");
        };
        let confidence = input.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7) as f32;
        match self.memory.save(topic, decision, confidence).await {
            Ok(()) => ToolResult::success_text("saved"),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn mem_update(&self, input: &Value) -> ToolResult {
        let (Some(topic), Some(decision)) = (
            input.get("topic").and_then(|v| v.as_str()),
            input.get("decision").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("missing required parameters: topic, decision");
        };
        let confidence = input.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7) as f32;
        match self.memory.update(topic, decision, confidence).await {
            Ok(()) => ToolResult::success_text("updated"),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn mem_load_checkpoint(&self, input: &Value) -> ToolResult {
        let Some(key) = input.get("key").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: key");
        };
        match self.memory.load_checkpoint(key).await {
            Ok(Some(text)) => ToolResult::success_text(text),
            Ok(None) => ToolResult::success_text(""),
            Err(e) => ToolResult::error(e),
        }
    }

    /// `Read` is sandboxed to the agent home directory (spec §4.4,
    /// testable scenario #3).
    async fn read_file(&self, input: &Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        match self.resolve_in_sandbox(path) {
            Ok(resolved) => match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => ToolResult::success_text(content),
                Err(e) => ToolResult::error(format!("failed to read '{path}': {e}")),
            },
            Err(e) => ToolResult::error(e),
        }
    }

    async fn write_file(&self, input: &Value) -> ToolResult {
        let (Some(path), Some(content)) = (
            input.get("path").and_then(|v| v.as_str()),
            input.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("missing required parameters: path, content");
        };
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::error(format!("failed to create directories for '{path}': {e}"));
                }
            }
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => ToolResult::success_text(format!("File written: {} bytes to '{path}'", content.len())),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }

    async fn bash(&self, input: &Value) -> ToolResult {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: command");
        };
        let opts = BashOptions {
            cwd: input.get("cwd").and_then(|v| v.as_str()).map(|s| s.to_string()),
            timeout: self.bash_timeout,
            max_output_bytes: self.bash_max_output_bytes,
        };
        match bash::run(command, opts).await {
            Ok(result) => ToolResult::success(serde_json::json!({
                "exit_code": result.exit_code,
                "stdout": result.stdout,
                "stderr": result.stderr,
                "timed_out": result.timed_out,
            })),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn discord_send(&self, input: &Value) -> ToolResult {
        let Some(channel_key) = input.get("channel_key").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: channel_key");
        };
        if let Some(text) = input.get("text").and_then(|v| v.as_str()) {
            return match self.gateway.send_message(channel_key, text).await {
                Ok(()) => ToolResult::success_text("sent"),
                Err(e) => ToolResult::error(e),
            };
        }
        if let Some(path) = input.get("image_path").and_then(|v| v.as_str()) {
            return match self.gateway.send_image(channel_key, path).await {
                Ok(()) => ToolResult::success_text("sent"),
                Err(e) => ToolResult::error(e),
            };
        }
        if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
            return match self.gateway.send_file(channel_key, path).await {
                Ok(()) => ToolResult::success_text("sent"),
                Err(e) => ToolResult::error(e),
            };
        }
        ToolResult::error("one of text, image_path, file_path is required")
    }

    async fn browser_call<F, Fut>(&self, input: &Value, f: F) -> ToolResult
    where
        F: FnOnce(&dyn BrowserFacade, &str) -> Fut,
        Fut: std::future::Future<Output = Result<String, String>>,
    {
        let Some(arg) = input
            .get("selector")
            .or_else(|| input.get("url"))
            .or_else(|| input.get("script"))
            .and_then(|v| v.as_str())
        else {
            return ToolResult::error("missing required parameter");
        };
        match f(self.browser.as_ref(), arg).await {
            Ok(out) => ToolResult::success_text(out),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn browser_noarg<F, Fut>(&self, f: F) -> ToolResult
    where
        F: FnOnce(&dyn BrowserFacade) -> Fut,
        Fut: std::future::Future<Output = Result<String, String>>,
    {
        match f(self.browser.as_ref()).await {
            Ok(out) => ToolResult::success_text(out),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn browser_type(&self, input: &Value) -> ToolResult {
        let (Some(selector), Some(text)) = (
            input.get("selector").and_then(|v| v.as_str()),
            input.get("text").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("missing required parameters: selector, text");
        };
        match self.browser.type_text(selector, text).await {
            Ok(out) => ToolResult::success_text(out),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn browser_scroll(&self, input: &Value) -> ToolResult {
        let dx = input.get("dx").and_then(|v| v.as_i64()).unwrap_or(0);
        let dy = input.get("dy").and_then(|v| v.as_i64()).unwrap_or(0);
        match self.browser.scroll(dx, dy).await {
            Ok(out) => ToolResult::success_text(out),
            Err(e) => ToolResult::error(e),
        }
    }

    fn resolve_in_sandbox(&self, path: &str) -> Result<PathBuf, String> {
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.sandbox_dir.join(path)
        };

        let sandbox_canon = std::fs::canonicalize(&self.sandbox_dir).unwrap_or_else(|_| self.sandbox_dir.clone());
        let resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);

        if resolved.starts_with(&sandbox_canon) {
            Ok(resolved)
        } else {
            Err(format!("Access denied: '{path}' is outside the sandbox"))
        }
    }
}
