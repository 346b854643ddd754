//! Agent Loop (C11, spec §4.11). Grounded on
//! `skynet-agent/src/{runtime.rs,pipeline/process.rs,tools/tool_loop.rs}`
//! (the turn loop shape, iteration ceiling, hook invocation points, token
//! accumulation) generalized from "one HTTP LLM call" to "one subprocess
//! turn" driven through a `TurnDriver`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use conduit_core::config::LoopConfig;
use conduit_core::error::ErrorCode;
use conduit_core::types::{ContentBlock, MessageContent, Role, StopReason, TurnRecord, Usage};
use conduit_core::{ChannelKey, CoreError};
use conduit_hooks::{
    compaction_prompt, contract::post_tool_contract_extraction, decide_continuation, pre_tool_contract_lookup,
    ChannelContinuationState, ContinuationDecision,
};
use conduit_lanes::LaneScheduler;
use conduit_process::{RawTurn, TurnDriver};
use conduit_prompt::KeywordDetector;
use conduit_sessions::SessionPool;
use conduit_tools::{MemoryStore, ToolExecutor};

use crate::response::{extract_gateway_tool_calls, render_outgoing_text};

/// How the loop should read tool calls out of a turn's response (spec
/// §4.11 step 4). Orthogonal to `conduit_prompt::compose::ToolMode`, which
/// governs prompt *composition*; this governs response *parsing* and is a
/// loop-level concern independent of which backend produced the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read native `tool_use` blocks the subprocess emitted (C8 in
    /// protocol mode).
    Native,
    /// Scan the response text for fenced `tool_call`/`js`/`javascript`
    /// blocks (C8 in gateway-tools mode, or any C9/MCP turn).
    GatewayText { code_act_enabled: bool },
}

type UsageCallback = Arc<dyn Fn(&Usage) + Send + Sync>;
type TurnCallback = Arc<dyn Fn(&TurnRecord) + Send + Sync>;

pub struct RunOptions {
    /// Caller-supplied session id; if absent, C6 resolves one and the loop
    /// releases it again at post-loop.
    pub session_id: Option<String>,
    pub response_mode: ResponseMode,
    pub on_usage: Option<UsageCallback>,
    pub on_turn: Option<TurnCallback>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            response_mode: ResponseMode::Native,
            on_usage: None,
            on_turn: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub response: String,
    pub turns: u32,
    pub history: Vec<TurnRecord>,
    pub total_usage: Usage,
    pub stop_reason: StopReason,
}

enum NextSend {
    Text(String),
    ToolResults(Vec<(String, String, bool)>),
}

/// Composes C1–C10/C12 into the turn-by-turn driver for one request.
pub struct AgentLoop {
    sessions: Arc<SessionPool>,
    lanes: Option<Arc<LaneScheduler>>,
    tools: Arc<ToolExecutor>,
    memory: Arc<dyn MemoryStore>,
    sandbox_dir: PathBuf,
    config: LoopConfig,
    contract_save_limit: usize,
    continuation_states: StdMutex<HashMap<String, ChannelContinuationState>>,
    keywords: KeywordDetector,
}

impl AgentLoop {
    pub fn new(
        sessions: Arc<SessionPool>,
        lanes: Option<Arc<LaneScheduler>>,
        tools: Arc<ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
        sandbox_dir: impl Into<PathBuf>,
        config: LoopConfig,
        contract_save_limit: usize,
    ) -> Self {
        Self {
            sessions,
            lanes,
            tools,
            memory,
            sandbox_dir: sandbox_dir.into(),
            config,
            contract_save_limit,
            continuation_states: StdMutex::new(HashMap::new()),
            keywords: KeywordDetector::default_detectors(),
        }
    }

    /// Drives one request end-to-end (spec §4.11). `driver` must already be
    /// started and dedicated to `channel_key` (the caller typically gets it
    /// from C10's `SubprocessPool`). When lanes are enabled the whole body
    /// runs inside C7's per-key FIFO + concurrency-class gate.
    pub async fn run(
        &self,
        channel_key: &ChannelKey,
        driver: &dyn TurnDriver,
        content_blocks: Vec<ContentBlock>,
        options: RunOptions,
    ) -> Result<LoopOutcome, CoreError> {
        if self.config.lanes_enabled {
            if let Some(lanes) = &self.lanes {
                let class = channel_key.concurrency_class();
                return lanes
                    .enqueue_with_session(channel_key.as_str(), class, || {
                        self.run_body(channel_key, driver, content_blocks, options)
                    })
                    .await;
            }
        }
        self.run_body(channel_key, driver, content_blocks, options).await
    }

    async fn run_body(
        &self,
        channel_key: &ChannelKey,
        driver: &dyn TurnDriver,
        content_blocks: Vec<ContentBlock>,
        options: RunOptions,
    ) -> Result<LoopOutcome, CoreError> {
        let (session_id, owned) = match &options.session_id {
            Some(id) => (id.clone(), false),
            None => {
                let (id, _is_new) = self.sessions.get_session(channel_key).await;
                (id, true)
            }
        };

        if self.config.stop_continuation_enabled {
            let mut states = self.continuation_states.lock().unwrap();
            states.entry(channel_key.as_str().to_string()).or_default().reset();
        }

        let mut history = vec![TurnRecord {
            turn_number: 0,
            role: Role::User,
            content: MessageContent::Blocks(content_blocks.clone()),
            stop_reason: None,
            usage: None,
        }];

        let outcome = self.turn_loop(channel_key, driver, &session_id, content_blocks, &options, &mut history).await;

        if owned {
            self.sessions.release_session(channel_key).await;
        }

        outcome.map(|(response, turns, total_usage, stop_reason)| LoopOutcome {
            response,
            turns,
            history,
            total_usage,
            stop_reason,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn turn_loop(
        &self,
        channel_key: &ChannelKey,
        driver: &dyn TurnDriver,
        session_id: &str,
        initial_content: Vec<ContentBlock>,
        options: &RunOptions,
        history: &mut Vec<TurnRecord>,
    ) -> Result<(String, u32, Usage, StopReason), CoreError> {
        let max_turns = self.config.max_turns;
        let emergency_ceiling = max_turns.saturating_add(10).max(50);

        let mut rendered_initial = render_outgoing_text(&initial_content, &self.sandbox_dir).await?;
        self.append_keyword_fragments(&mut rendered_initial);
        let mut next_send = NextSend::Text(rendered_initial);

        let mut turn: u32 = 0;
        let mut total_usage = Usage::default();
        let mut last_tool_name: Option<String> = None;
        let mut consecutive_same_tool: u32 = 0;
        let mut compaction_injected = false;
        let mut pending_compaction_notice: Option<String> = None;
        let mut transcript = String::new();

        tracing::debug!(channel = %channel_key, session_id, "agent loop starting");

        loop {
            turn += 1;
            if turn > emergency_ceiling {
                return Err(CoreError::classified(
                    ErrorCode::EmergencyMaxTurns,
                    format!("crossed emergency turn ceiling ({emergency_ceiling})"),
                ));
            }

            let raw = self.send_with_retry(channel_key, driver, &mut next_send).await?;

            let (prose, tool_uses) = match options.response_mode {
                ResponseMode::Native => (raw.text.clone(), raw.native_tool_uses.clone()),
                ResponseMode::GatewayText { code_act_enabled } => {
                    extract_gateway_tool_calls(&raw.text, code_act_enabled)
                }
            };
            let has_tool_use = !tool_uses.is_empty();
            let stop_reason = if has_tool_use { StopReason::ToolUse } else { raw.stop_reason };

            transcript.push_str(&prose);
            transcript.push('\n');

            total_usage.input_tokens += raw.usage.input_tokens;
            total_usage.output_tokens += raw.usage.output_tokens;
            if let Some(cb) = &options.on_usage {
                cb(&raw.usage);
            }

            let near_threshold = self.sessions.update_tokens(channel_key, total_usage.input_tokens).await;
            if near_threshold && self.config.pre_compact_enabled && !compaction_injected {
                compaction_injected = true;
                let decisions = conduit_hooks::compaction::detect_unsaved_decisions(&transcript, &[], 10);
                pending_compaction_notice = Some(compaction_prompt(&decisions));
            }

            let assistant_content = if has_tool_use {
                let mut blocks = Vec::new();
                if !prose.is_empty() {
                    blocks.push(ContentBlock::text(prose.clone()));
                }
                blocks.extend(tool_uses.iter().cloned());
                MessageContent::Blocks(blocks)
            } else {
                MessageContent::Plain(prose.clone())
            };
            history.push(TurnRecord {
                turn_number: turn,
                role: Role::Assistant,
                content: assistant_content,
                stop_reason: Some(stop_reason),
                usage: Some(raw.usage.clone()),
            });
            if let Some(cb) = &options.on_turn {
                cb(history.last().unwrap());
            }

            match stop_reason {
                StopReason::EndTurn | StopReason::StopSequence => {
                    if self.config.stop_continuation_enabled {
                        match self.decide_and_update_continuation(channel_key, &prose) {
                            ContinuationDecision::Stop => return Ok((prose, turn, total_usage, stop_reason)),
                            ContinuationDecision::Continue { message } => {
                                let message = match pending_compaction_notice.take() {
                                    Some(notice) => {
                                        history.push(TurnRecord {
                                            turn_number: turn,
                                            role: Role::User,
                                            content: MessageContent::Plain(notice.clone()),
                                            stop_reason: None,
                                            usage: None,
                                        });
                                        format!("{notice}\n\n{message}")
                                    }
                                    None => message,
                                };
                                history.push(TurnRecord {
                                    turn_number: turn,
                                    role: Role::User,
                                    content: MessageContent::Plain(message.clone()),
                                    stop_reason: None,
                                    usage: None,
                                });
                                next_send = NextSend::Text(message);
                            }
                        }
                    } else {
                        return Ok((prose, turn, total_usage, stop_reason));
                    }
                }
                StopReason::MaxTokens => {
                    return Err(CoreError::classified(ErrorCode::MaxTokens, "response hit the model's max-token limit"));
                }
                StopReason::ToolUse => {
                    let turn_tool_name = tool_uses.first().and_then(|b| match b {
                        ContentBlock::ToolUse { name, .. } => Some(name.clone()),
                        _ => None,
                    });
                    if turn_tool_name.is_some() && turn_tool_name == last_tool_name {
                        consecutive_same_tool += 1;
                    } else {
                        consecutive_same_tool = 1;
                        last_tool_name = turn_tool_name.clone();
                    }
                    if consecutive_same_tool >= self.config.max_consecutive_same_tool {
                        return Err(CoreError::classified(
                            ErrorCode::InfiniteLoopDetected,
                            format!(
                                "tool '{}' called {consecutive_same_tool} consecutive turns",
                                turn_tool_name.unwrap_or_default()
                            ),
                        ));
                    }
                    if turn >= max_turns {
                        return Err(CoreError::classified(
                            ErrorCode::MaxTurns,
                            format!("max_turns ({max_turns}) reached while still dispatching tool calls"),
                        ));
                    }

                    let mut tool_results = self.dispatch_tools(tool_uses).await;
                    if let Some(notice) = pending_compaction_notice.take() {
                        history.push(TurnRecord {
                            turn_number: turn,
                            role: Role::User,
                            content: MessageContent::Plain(notice.clone()),
                            stop_reason: None,
                            usage: None,
                        });
                        if let Some((_, content, _)) = tool_results.first_mut() {
                            *content = format!("{notice}\n\n{content}");
                        }
                    }
                    let result_blocks = tool_results
                        .iter()
                        .map(|(id, content, is_error)| ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        })
                        .collect();
                    history.push(TurnRecord {
                        turn_number: turn,
                        role: Role::User,
                        content: MessageContent::Blocks(result_blocks),
                        stop_reason: None,
                        usage: None,
                    });
                    next_send = NextSend::ToolResults(tool_results);
                }
            }
        }
    }

    /// Appends bounded mode-instruction fragments (spec §4.12) to the
    /// user's outgoing text when it matches a keyword detector. Only ever
    /// scans the user's own text, never tool-result content.
    fn append_keyword_fragments(&self, text: &mut String) {
        let fragments = self.keywords.detect_fragments(text);
        for fragment in fragments {
            text.push_str("\n\n");
            text.push_str(fragment);
        }
    }

    fn decide_and_update_continuation(&self, channel_key: &ChannelKey, text: &str) -> ContinuationDecision {
        let mut states = self.continuation_states.lock().unwrap();
        let state = states.entry(channel_key.as_str().to_string()).or_default();
        decide_continuation(text, state, self.config.stop_continuation_max_retries, self.config.continuation_min_chars)
    }

    /// Executes every `tool_use` block via C4, with the C5 pre-tool
    /// contract lookup prepended to the result text the model sees and the
    /// C5 post-tool contract extraction fired in the background.
    async fn dispatch_tools(&self, tool_uses: Vec<ContentBlock>) -> Vec<(String, String, bool)> {
        let mut results = Vec::with_capacity(tool_uses.len());
        for block in tool_uses {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };
            let prefix = pre_tool_contract_lookup(&name, &input, &self.memory).await;

            match self.tools.execute(&name, input.clone()).await {
                Ok(result) => {
                    let is_error = !result.success;
                    results.push((id, format!("{prefix}{}", result.to_content_string()), is_error));
                    if result.success {
                        if let (Some(path), Some(body)) =
                            (input.get("path").and_then(|v| v.as_str()), input.get("content").and_then(|v| v.as_str()))
                        {
                            let memory = self.memory.clone();
                            let tool_name = name.clone();
                            let file = path.to_string();
                            let body = body.to_string();
                            let limit = self.contract_save_limit;
                            tokio::spawn(async move {
                                post_tool_contract_extraction(&tool_name, &file, &body, memory, limit).await;
                            });
                        }
                    }
                }
                Err(e) => {
                    results.push((id, format!("{prefix}{e}"), true));
                }
            }
        }
        results
    }

    /// Sends `next_send`, retrying once with a brand-new session on the
    /// retryable-CLI-error set spec §4.11 step 3 / §7 name (stale session
    /// id, session already in use, prompt too long). Other errors are
    /// wrapped `CLI_ERROR` (retryable) and propagated.
    async fn send_with_retry(
        &self,
        channel_key: &ChannelKey,
        driver: &dyn TurnDriver,
        next_send: &mut NextSend,
    ) -> Result<RawTurn, CoreError> {
        match Self::dispatch_send(driver, next_send).await {
            Ok(raw) => Ok(raw),
            Err(e) => {
                let message = e.to_string();
                if !is_session_reset_trigger(&message) {
                    return Err(CoreError::classified(ErrorCode::CliError, message));
                }

                tracing::warn!(channel = %channel_key, error = %message, "retryable subprocess error, resetting session");
                let _ = self.sessions.reset_session(channel_key).await;
                driver.stop().await;
                driver.start().await?;

                let mut raw = Self::dispatch_send(driver, next_send).await?;
                if message_needs_too_long_notice(&message) {
                    raw.text = format!(
                        "[Note: the previous message was too long for the model; the conversation was reset.]\n\n{}",
                        raw.text
                    );
                }
                Ok(raw)
            }
        }
    }

    async fn dispatch_send(driver: &dyn TurnDriver, next_send: &NextSend) -> Result<RawTurn, CoreError> {
        match next_send {
            NextSend::Text(text) => driver.send_text(text).await,
            NextSend::ToolResults(results) => driver.send_tool_results(results.clone()).await,
        }
    }
}

fn is_session_reset_trigger(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no conversation found")
        || lower.contains("is already in use")
        || lower.contains("too long")
        || lower.contains("request_too_large")
}

fn message_needs_too_long_notice(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("too long") || lower.contains("request_too_large")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_process::ManagedSubprocess;
    use conduit_sessions::SessionPoolConfig;
    use conduit_tools::facades::{BrowserFacade, GatewayFacade};
    use conduit_tools::{InMemoryMemoryStore, ToolExecutor};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedDriver {
        responses: Mutex<Vec<RawTurn>>,
        calls: AtomicU32,
    }

    impl ScriptedDriver {
        fn new(mut responses: Vec<RawTurn>) -> Self {
            responses.reverse();
            Self { responses: Mutex::new(responses), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl ManagedSubprocess for ScriptedDriver {
        async fn start(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn stop(&self) {}
        fn is_alive(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl TurnDriver for ScriptedDriver {
        async fn send_text(&self, _text: &str) -> Result<RawTurn, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().pop().ok_or_else(|| {
                CoreError::classified(ErrorCode::CliError, "scripted driver exhausted")
            })
        }
        async fn send_tool_results(&self, _results: Vec<(String, String, bool)>) -> Result<RawTurn, CoreError> {
            self.send_text("").await
        }
    }

    fn end_turn(text: &str) -> RawTurn {
        RawTurn {
            text: text.to_string(),
            native_tool_uses: vec![],
            usage: Usage { input_tokens: 10, output_tokens: 5 },
            session_id: Some("s1".to_string()),
            stop_reason: StopReason::EndTurn,
        }
    }

    fn tool_use_turn(name: &str) -> RawTurn {
        RawTurn {
            text: String::new(),
            native_tool_uses: vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: name.to_string(),
                input: serde_json::json!({}),
            }],
            usage: Usage { input_tokens: 10, output_tokens: 5 },
            session_id: Some("s1".to_string()),
            stop_reason: StopReason::ToolUse,
        }
    }

    struct NullGateway;
    #[async_trait]
    impl GatewayFacade for NullGateway {
        async fn send_message(&self, _channel_key: &str, _text: &str) -> Result<(), String> {
            Ok(())
        }
        async fn send_file(&self, _channel_key: &str, _path: &str) -> Result<(), String> {
            Ok(())
        }
        async fn send_image(&self, _channel_key: &str, _path: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct NullBrowser;
    #[async_trait]
    impl BrowserFacade for NullBrowser {
        async fn navigate(&self, _url: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn screenshot(&self) -> Result<String, String> {
            Ok(String::new())
        }
        async fn click(&self, _selector: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn type_text(&self, _selector: &str, _text: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn get_text(&self, _selector: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn scroll(&self, _dx: i64, _dy: i64) -> Result<String, String> {
            Ok(String::new())
        }
        async fn wait_for(&self, _selector: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn evaluate(&self, _script: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn pdf(&self) -> Result<String, String> {
            Ok(String::new())
        }
        async fn close(&self) -> Result<(), String> {
            Ok(())
        }
    }

    fn make_loop() -> AgentLoop {
        let sessions = Arc::new(SessionPool::new(SessionPoolConfig::default()));
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let gateway: Arc<dyn GatewayFacade> = Arc::new(NullGateway);
        let browser: Arc<dyn BrowserFacade> = Arc::new(NullBrowser);
        let tools = Arc::new(ToolExecutor::new(std::env::temp_dir(), memory.clone(), gateway, browser));
        AgentLoop::new(sessions, None, tools, memory, std::env::temp_dir(), LoopConfig::default(), 5)
    }

    #[tokio::test]
    async fn simple_end_turn_completes_in_one_turn() {
        let agent_loop = make_loop();
        let driver = ScriptedDriver::new(vec![end_turn("All done.")]);
        let key = ChannelKey::new("discord:1");
        let outcome = agent_loop
            .run(&key, &driver, vec![ContentBlock::text("hi")], RunOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.response, "All done.");
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.stop_reason, StopReason::EndTurn);
    }

    #[tokio::test]
    async fn tool_use_then_end_turn_dispatches_and_continues() {
        let agent_loop = make_loop();
        let driver = ScriptedDriver::new(vec![tool_use_turn("Bash"), end_turn("Finished.")]);
        let key = ChannelKey::new("discord:1");
        let mut options = RunOptions::default();
        options.response_mode = ResponseMode::Native;
        let outcome = agent_loop.run(&key, &driver, vec![ContentBlock::text("run something")], options).await.unwrap();
        assert_eq!(outcome.response, "Finished.");
        assert_eq!(outcome.turns, 2);
    }

    #[tokio::test]
    async fn infinite_loop_detection_trips_after_threshold() {
        let mut config = LoopConfig::default();
        config.max_consecutive_same_tool = 3;
        config.max_turns = 50;
        let sessions = Arc::new(SessionPool::new(SessionPoolConfig::default()));
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let gateway: Arc<dyn GatewayFacade> = Arc::new(NullGateway);
        let browser: Arc<dyn BrowserFacade> = Arc::new(NullBrowser);
        let tools = Arc::new(ToolExecutor::new(std::env::temp_dir(), memory.clone(), gateway, browser));
        let agent_loop = AgentLoop::new(sessions, None, tools, memory, std::env::temp_dir(), config, 5);

        let driver = ScriptedDriver::new(vec![
            tool_use_turn("Bash"),
            tool_use_turn("Bash"),
            tool_use_turn("Bash"),
        ]);
        let key = ChannelKey::new("discord:1");
        let result = agent_loop.run(&key, &driver, vec![ContentBlock::text("loop")], RunOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "INFINITE_LOOP_DETECTED");
    }

    #[tokio::test]
    async fn keyword_match_appends_fragment_to_outgoing_text() {
        let agent_loop = make_loop();
        let driver = ScriptedDriver::new(vec![end_turn("ok")]);
        let key = ChannelKey::new("discord:1");
        let _ = agent_loop
            .run(&key, &driver, vec![ContentBlock::text("please think hard about this")], RunOptions::default())
            .await
            .unwrap();
        // The scripted driver doesn't echo back what it was sent, so assert
        // indirectly via the detector itself producing a fragment for this
        // input — the loop's append happens before the first send.
        let fragments = agent_loop.keywords.detect_fragments("please think hard about this");
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result_not_fatal() {
        let agent_loop = make_loop();
        let driver = ScriptedDriver::new(vec![tool_use_turn("NotARealTool"), end_turn("ok")]);
        let key = ChannelKey::new("discord:1");
        let outcome = agent_loop.run(&key, &driver, vec![ContentBlock::text("go")], RunOptions::default()).await.unwrap();
        assert_eq!(outcome.response, "ok");
    }
}
