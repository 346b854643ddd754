pub mod mcp;
pub mod stream_json;

use conduit_core::types::{ContentBlock, StopReason, Usage};
use conduit_core::CoreError;

pub use mcp::McpProcess;
pub use stream_json::{StreamJsonProcess, TurnOutcome};

/// Common lifecycle surface the subprocess pool (C10) needs: lazily start a
/// handle, ask whether it's still alive, and hard-stop it. Both subprocess
/// variants implement this identically regardless of wire framing.
#[async_trait::async_trait]
pub trait ManagedSubprocess: Send + Sync {
    async fn start(&self) -> Result<(), conduit_core::CoreError>;
    async fn stop(&self);
    fn is_alive(&self) -> bool;
}

/// Backend-agnostic turn result (C11's view of either subprocess variant).
/// Stream-json carries native `tool_use` blocks and real usage figures;
/// MCP's `codex`/`codex-reply` protocol has no native tool-calling, so its
/// turns always come back with an empty `native_tool_uses`, zeroed usage,
/// and `StopReason::EndTurn` — any tool calls embedded in its text are
/// picked up by the agent loop's gateway-text parsing, same as a
/// gateway-tools-mode stream-json turn.
#[derive(Debug, Clone)]
pub struct RawTurn {
    pub text: String,
    pub native_tool_uses: Vec<ContentBlock>,
    pub usage: Usage,
    pub session_id: Option<String>,
    pub stop_reason: StopReason,
}

/// Uniform send surface the agent loop (C11) drives regardless of backend.
/// Supertrait of `ManagedSubprocess` so a caller holding `&dyn TurnDriver`
/// can start/stop/query liveness without a separate handle.
#[async_trait::async_trait]
pub trait TurnDriver: ManagedSubprocess {
    async fn send_text(&self, text: &str) -> Result<RawTurn, CoreError>;
    async fn send_tool_results(&self, results: Vec<(String, String, bool)>) -> Result<RawTurn, CoreError>;
}

#[async_trait::async_trait]
impl TurnDriver for StreamJsonProcess {
    async fn send_text(&self, text: &str) -> Result<RawTurn, CoreError> {
        StreamJsonProcess::send_message(self, text).await.map(turn_outcome_to_raw)
    }

    async fn send_tool_results(&self, results: Vec<(String, String, bool)>) -> Result<RawTurn, CoreError> {
        StreamJsonProcess::send_tool_results(self, results).await.map(turn_outcome_to_raw)
    }
}

fn turn_outcome_to_raw(outcome: TurnOutcome) -> RawTurn {
    RawTurn {
        text: outcome.response,
        stop_reason: if outcome.has_tool_use { StopReason::ToolUse } else { StopReason::EndTurn },
        native_tool_uses: outcome.tool_use_blocks,
        usage: outcome.usage,
        session_id: outcome.session_id,
    }
}

#[async_trait::async_trait]
impl TurnDriver for McpProcess {
    async fn send_text(&self, text: &str) -> Result<RawTurn, CoreError> {
        let response = McpProcess::send(self, text).await?;
        Ok(RawTurn {
            text: response,
            native_tool_uses: Vec::new(),
            usage: Usage::default(),
            session_id: self.thread_id(),
            stop_reason: StopReason::EndTurn,
        })
    }

    /// MCP has no native tool-result channel; a tool-results turn is sent
    /// back as a plain text summary through `codex-reply`.
    async fn send_tool_results(&self, results: Vec<(String, String, bool)>) -> Result<RawTurn, CoreError> {
        let rendered = results
            .iter()
            .map(|(id, content, is_error)| format!("[tool_result {id} is_error={is_error}] {content}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.send_text(&rendered).await
    }
}

#[async_trait::async_trait]
impl ManagedSubprocess for StreamJsonProcess {
    async fn start(&self) -> Result<(), conduit_core::CoreError> {
        StreamJsonProcess::start(self).await
    }

    async fn stop(&self) {
        StreamJsonProcess::stop(self).await
    }

    fn is_alive(&self) -> bool {
        StreamJsonProcess::is_alive(self)
    }
}

#[async_trait::async_trait]
impl ManagedSubprocess for McpProcess {
    async fn start(&self) -> Result<(), conduit_core::CoreError> {
        McpProcess::start(self).await
    }

    async fn stop(&self) {
        McpProcess::stop(self).await
    }

    fn is_alive(&self) -> bool {
        McpProcess::is_alive(self)
    }
}
