//! Persistent subprocess, stream-json variant (C8, spec §4.8). Grounded on
//! `skynet-terminal/src/manager.rs`'s `exec()` for spawn/PID-capture/
//! timeout-race/kill plumbing and on `skynet-agent/src/claude_cli.rs` for
//! "own a long-lived CLI child, parse its newline-framed JSON stdout".
//! The `dead|starting|idle|busy` state machine and event table are spec-
//! native; framing comes from `conduit_protocol::stream_json`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use conduit_core::error::ErrorCode;
use conduit_core::types::ContentBlock;
use conduit_core::CoreError;
use conduit_protocol::stream_json::{feed, AssistantBlock, InboundEvent, OutboundBlock, OutboundUserFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Dead,
    Starting,
    Idle,
    Busy,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub usage: conduit_core::types::Usage,
    pub tool_use_blocks: Vec<ContentBlock>,
    pub has_tool_use: bool,
    pub session_id: Option<String>,
    pub cost: Option<f64>,
    pub duration_ms: Option<u64>,
}

#[derive(Default)]
struct Accumulator {
    text: String,
    tool_uses: Vec<ContentBlock>,
}

type PendingTx = oneshot::Sender<Result<TurnOutcome, CoreError>>;

struct Shared {
    state: StdMutex<ProcessState>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    pid: StdMutex<Option<u32>>,
    pending: StdMutex<Option<PendingTx>>,
    accumulator: StdMutex<Accumulator>,
    alive: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: StdMutex::new(ProcessState::Dead),
            stdin: AsyncMutex::new(None),
            pid: StdMutex::new(None),
            pending: StdMutex::new(None),
            accumulator: StdMutex::new(Accumulator::default()),
            alive: AtomicBool::new(false),
        }
    }

    fn set_state(&self, s: ProcessState) {
        *self.state.lock().unwrap() = s;
    }

    fn get_state(&self) -> ProcessState {
        *self.state.lock().unwrap()
    }

    fn take_pending(&self) -> Option<PendingTx> {
        self.pending.lock().unwrap().take()
    }

    fn complete(&self, result: Result<TurnOutcome, CoreError>) {
        if let Some(tx) = self.take_pending() {
            let _ = tx.send(result);
        }
    }

    fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::System { subtype, .. } => {
                tracing::info!(subtype, "stream-json system event");
            }
            InboundEvent::Assistant { message } => {
                let mut acc = self.accumulator.lock().unwrap();
                for block in message.content {
                    match block {
                        AssistantBlock::Text { text } => acc.text.push_str(&text),
                        AssistantBlock::ToolUse { id, name, input } => {
                            acc.tool_uses.push(ContentBlock::ToolUse { id, name, input });
                        }
                    }
                }
            }
            InboundEvent::Result { subtype, result, session_id, total_cost_usd, duration_ms, usage } => {
                self.set_state(ProcessState::Idle);
                if subtype == "success" {
                    let mut acc = self.accumulator.lock().unwrap();
                    let response = if acc.text.is_empty() { result.unwrap_or_default() } else { acc.text.clone() };
                    let tool_use_blocks = std::mem::take(&mut acc.tool_uses);
                    let has_tool_use = !tool_use_blocks.is_empty();
                    drop(acc);
                    let outcome = TurnOutcome {
                        response,
                        usage: conduit_core::types::Usage {
                            input_tokens: usage.as_ref().and_then(|u| u.input_tokens).unwrap_or(0),
                            output_tokens: usage.as_ref().and_then(|u| u.output_tokens).unwrap_or(0),
                        },
                        tool_use_blocks,
                        has_tool_use,
                        session_id,
                        cost: total_cost_usd,
                        duration_ms,
                    };
                    self.complete(Ok(outcome));
                } else {
                    self.complete(Err(CoreError::classified(
                        ErrorCode::CliError,
                        result.unwrap_or_else(|| "result/error".to_string()),
                    )));
                }
            }
            InboundEvent::Error { error } => {
                self.set_state(ProcessState::Idle);
                self.complete(Err(CoreError::classified(ErrorCode::CliError, error)));
            }
        }
    }

    fn handle_close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.set_state(ProcessState::Dead);
        *self.pid.lock().unwrap() = None;
        self.complete(Err(CoreError::classified(ErrorCode::CliError, "subprocess closed".to_string())));
    }
}

pub struct ProcessOptions {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub request_timeout: Duration,
}

/// A long-lived stream-json CLI child process (C8). Cloning shares the
/// underlying handle; `start()` is internally serialised so only one
/// spawn attempt runs at a time even if called concurrently.
#[derive(Clone)]
pub struct StreamJsonProcess {
    shared: Arc<Shared>,
    options: Arc<ProcessOptions>,
    start_lock: Arc<AsyncMutex<()>>,
}

impl StreamJsonProcess {
    pub fn new(options: ProcessOptions) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            options: Arc::new(options),
            start_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Dead)
    }

    fn get_state(&self) -> ProcessState {
        self.shared.get_state()
    }

    /// Spawns the child if currently `dead`. A ~500ms grace period lets the
    /// process stabilise before the state becomes `idle`; if it died in
    /// that window, start fails and the state is `dead`.
    pub async fn start(&self) -> Result<(), CoreError> {
        let _guard = self.start_lock.lock().await;
        if self.get_state() != ProcessState::Dead {
            return Ok(());
        }

        let Some(program) = self.options.argv.first() else {
            return Err(CoreError::classified(ErrorCode::CliError, "empty argument vector".to_string()));
        };

        let mut command = Command::new(program);
        command.args(&self.options.argv[1..]);
        if let Some(cwd) = &self.options.cwd {
            command.current_dir(cwd);
        }
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);

        let mut child: Child = command
            .spawn()
            .map_err(|e| CoreError::classified(ErrorCode::CliError, format!("spawn failed: {e}")))?;

        let pid = child.id();
        let stdout = child.stdout.take().expect("stdout piped");
        let stdin = child.stdin.take().expect("stdin piped");

        *self.shared.pid.lock().unwrap() = pid;
        *self.shared.stdin.lock().await = Some(stdin);
        self.shared.alive.store(true, Ordering::SeqCst);
        self.shared.set_state(ProcessState::Starting);

        let reader_shared = self.shared.clone();
        tokio::spawn(async move {
            read_loop(stdout, reader_shared).await;
        });

        let wait_shared = self.shared.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            wait_shared.handle_close();
        });

        tokio::time::sleep(Duration::from_millis(500)).await;

        if self.shared.alive.load(Ordering::SeqCst) {
            self.shared.set_state(ProcessState::Idle);
            Ok(())
        } else {
            Err(CoreError::classified(ErrorCode::CliError, "child exited during startup".to_string()))
        }
    }

    /// Sends a user message. Fails fast with `CLI_ERROR` ("busy") if a turn
    /// is already in flight; starts the child first if `dead`.
    pub async fn send_message(&self, text: &str) -> Result<TurnOutcome, CoreError> {
        if self.get_state() == ProcessState::Dead {
            self.start().await?;
        }
        let stripped = conduit_protocol::stream_json::strip_lone_surrogates(text);
        let frame = OutboundUserFrame::text(stripped);
        self.send_frame(frame).await
    }

    /// Sends a batch of tool results for the current turn.
    pub async fn send_tool_results(&self, results: Vec<(String, String, bool)>) -> Result<TurnOutcome, CoreError> {
        if self.get_state() == ProcessState::Dead {
            self.start().await?;
        }
        let blocks = results
            .into_iter()
            .map(|(tool_use_id, content, is_error)| OutboundBlock::ToolResult { tool_use_id, content, is_error })
            .collect();
        let frame = OutboundUserFrame::tool_results(blocks);
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: OutboundUserFrame) -> Result<TurnOutcome, CoreError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == ProcessState::Busy {
                return Err(CoreError::classified(ErrorCode::CliError, "busy".to_string()));
            }
            *state = ProcessState::Busy;
        }
        *self.shared.accumulator.lock().unwrap() = Accumulator::default();

        let (tx, rx) = oneshot::channel();
        *self.shared.pending.lock().unwrap() = Some(tx);

        let line = format!("{}\n", frame.to_line());
        {
            let mut stdin_guard = self.shared.stdin.lock().await;
            let Some(stdin) = stdin_guard.as_mut() else {
                self.shared.set_state(ProcessState::Idle);
                self.shared.take_pending();
                return Err(CoreError::classified(ErrorCode::CliError, "stdin not writable".to_string()));
            };
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.shared.set_state(ProcessState::Idle);
                self.shared.take_pending();
                return Err(CoreError::classified(ErrorCode::CliError, format!("write failed: {e}")));
            }
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                Err(CoreError::classified(ErrorCode::CliError, "subprocess dropped the pending request".to_string()))
            }
            Err(_) => {
                self.shared.take_pending();
                self.shared.set_state(ProcessState::Idle);
                Err(CoreError::classified(ErrorCode::CliError, "request timed out".to_string()))
            }
        }
    }

    /// Hard stop: kills the child, rejects any pending request, clears state.
    pub async fn stop(&self) {
        if let Some(pid) = *self.shared.pid.lock().unwrap() {
            kill_pid(pid);
        }
        self.shared.handle_close();
    }
}

async fn read_loop(mut stdout: tokio::process::ChildStdout, shared: Arc<Shared>) {
    let mut buffer = String::new();
    let mut raw = [0u8; 4096];
    loop {
        match stdout.read(&mut raw).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&raw[..n]);
                for parsed in feed(&mut buffer, &chunk) {
                    match parsed {
                        Ok(event) => shared.handle_event(event),
                        Err(e) => tracing::warn!(error = %e, "malformed stream-json line"),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream-json stdout read failed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) {
    let _ = std::process::Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_options(script: &str, timeout_ms: u64) -> ProcessOptions {
        ProcessOptions {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            cwd: None,
            request_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn starts_and_completes_a_turn() {
        // Echoes one assistant text event then a success result for any
        // line it receives on stdin, mirroring a minimal stream-json CLI.
        let script = r#"
            while IFS= read -r line; do
                echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}'
                echo '{"type":"result","subtype":"success","result":"hello","session_id":"s1","usage":{"input_tokens":10,"output_tokens":2}}'
            done
        "#;
        let process = StreamJsonProcess::new(script_options(script, 5_000));
        let outcome = process.send_message("hi").await.expect("turn succeeds");
        assert_eq!(outcome.response, "hello");
        assert_eq!(outcome.session_id.as_deref(), Some("s1"));
        assert!(!outcome.has_tool_use);
    }

    #[tokio::test]
    async fn busy_rejects_concurrent_send() {
        let script = r#"
            while IFS= read -r line; do
                sleep 1
                echo '{"type":"result","subtype":"success","result":"ok"}'
            done
        "#;
        let process = StreamJsonProcess::new(script_options(script, 5_000));
        process.start().await.unwrap();

        let process2 = process.clone();
        let first = tokio::spawn(async move { process2.send_message("first").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = process.send_message("second").await;
        assert!(second.is_err());
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dead_child_fails_start() {
        let process = StreamJsonProcess::new(script_options("exit 1", 2_000));
        let result = process.start().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_returns_process_to_idle() {
        let script = r#"
            while IFS= read -r line; do
                sleep 5
            done
        "#;
        let process = StreamJsonProcess::new(script_options(script, 200));
        let result = process.send_message("hi").await;
        assert!(result.is_err());
    }
}
