//! Persistent subprocess, MCP/JSON-RPC variant (C9, spec §4.9). Same
//! `dead|starting|idle|busy` shape as [`crate::stream_json`] with JSON-RPC
//! framing, an `initialize` handshake, and `codex`/`codex-reply` tool
//! invocation with thread-id tracking and single-retry recovery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use conduit_core::error::ErrorCode;
use conduit_core::CoreError;
use conduit_protocol::mcp::{
    extract_codex_response, parse_response_line, ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse,
    ToolCallParams, ToolCallResult,
};
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

type PendingMap = HashMap<u64, oneshot::Sender<Result<JsonRpcResponse, CoreError>>>;

struct Shared {
    state: StdMutex<ProcessState>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    pid: StdMutex<Option<u32>>,
    pending: StdMutex<PendingMap>,
    alive: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: StdMutex::new(ProcessState::Dead),
            stdin: AsyncMutex::new(None),
            pid: StdMutex::new(None),
            pending: StdMutex::new(HashMap::new()),
            alive: AtomicBool::new(false),
        }
    }

    fn set_state(&self, s: ProcessState) {
        *self.state.lock().unwrap() = s;
    }

    fn get_state(&self) -> ProcessState {
        *self.state.lock().unwrap()
    }

    fn register(&self, id: u64, tx: oneshot::Sender<Result<JsonRpcResponse, CoreError>>) {
        self.pending.lock().unwrap().insert(id, tx);
    }

    fn resolve(&self, id: u64, result: Result<JsonRpcResponse, CoreError>) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&id) {
            let _ = tx.send(result);
        }
    }

    fn reject_all(&self, message: &str) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(CoreError::classified(ErrorCode::CliError, message.to_string())));
        }
    }

    fn handle_line(&self, line: &str) {
        match parse_response_line(line) {
            Ok(response) => self.resolve(response.id, Ok(response)),
            Err(e) => tracing::warn!(error = %e, "malformed mcp response line"),
        }
    }

    fn handle_close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.set_state(ProcessState::Dead);
        *self.pid.lock().unwrap() = None;
        self.reject_all("subprocess closed");
    }
}

pub struct McpOptions {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub init_timeout: Duration,
    pub tool_call_timeout: Duration,
}

/// Recoverable per spec §4.9: these failures warrant clearing the thread id,
/// restarting the subprocess, and retrying the call exactly once.
fn is_recoverable(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timed out", "timeout", "not running", "closed", "connection closed", "econnreset"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[derive(Clone)]
pub struct McpProcess {
    shared: Arc<Shared>,
    options: Arc<McpOptions>,
    start_lock: Arc<AsyncMutex<()>>,
    next_id: Arc<AtomicU64>,
    thread_id: Arc<StdMutex<Option<String>>>,
}

impl McpProcess {
    pub fn new(options: McpOptions) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            options: Arc::new(options),
            start_lock: Arc::new(AsyncMutex::new(())),
            next_id: Arc::new(AtomicU64::new(1)),
            thread_id: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn thread_id(&self) -> Option<String> {
        self.thread_id.lock().unwrap().clone()
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Dead)
    }

    fn get_state(&self) -> ProcessState {
        self.shared.get_state()
    }

    /// Spawns the child (if `dead`) and performs the `initialize` handshake.
    /// Serialised: only one `start()` runs at a time.
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

        let init_params = InitializeParams {
            protocol_version: conduit_core::config::PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo { name: "conduit", version: env!("CARGO_PKG_VERSION") },
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(init_params).unwrap()), self.options.init_timeout)
            .await;

        match result {
            Ok(_) => {
                self.shared.set_state(ProcessState::Idle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ProcessState::Dead);
                Err(e)
            }
        }
    }

    async fn request(&self, method: &str, params: Option<serde_json::Value>, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx);

        {
            let mut stdin_guard = self.shared.stdin.lock().await;
            let Some(stdin) = stdin_guard.as_mut() else {
                return Err(CoreError::classified(ErrorCode::CliError, "stdin not writable".to_string()));
            };
            let line = format!("{}\n", request.to_line());
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                return Err(CoreError::classified(ErrorCode::CliError, format!("write failed: {e}")));
            }
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(CoreError::classified(ErrorCode::CliError, "subprocess dropped request".to_string())),
            Err(_) => return Err(CoreError::classified(ErrorCode::CliError, "request timed out".to_string())),
        };

        if let Some(error) = response.error {
            return Err(CoreError::classified(ErrorCode::CliError, error.message));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<(Option<String>, String), CoreError> {
        if self.get_state() == ProcessState::Dead {
            self.start().await?;
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == ProcessState::Busy {
                return Err(CoreError::classified(ErrorCode::CliError, "busy".to_string()));
            }
            *state = ProcessState::Busy;
        }

        let params = ToolCallParams { name: name.to_string(), arguments };
        let outcome = self
            .request("tools/call", Some(serde_json::to_value(params).unwrap()), self.options.tool_call_timeout)
            .await;

        self.shared.set_state(ProcessState::Idle);

        let value = outcome?;
        let tool_result: ToolCallResult = serde_json::from_value(value)
            .map_err(|e| CoreError::classified(ErrorCode::InvalidResponse, format!("bad tool result: {e}")))?;
        let existing = self.thread_id();
        Ok(extract_codex_response(&tool_result, existing.as_deref()))
    }

    /// Sends `prompt`: `codex` before the first message, `codex-reply`
    /// after, keyed by the tracked `thread_id`. Retries exactly once on a
    /// recoverable error, clearing the thread id and restarting first.
    pub async fn send(&self, prompt: &str) -> Result<String, CoreError> {
        match self.send_once(prompt).await {
            Ok(text) => Ok(text),
            Err(e) if is_recoverable(&e.to_string()) => {
                tracing::warn!(error = %e, "recoverable mcp error, restarting and retrying once");
                *self.thread_id.lock().unwrap() = None;
                self.stop().await;
                self.start().await?;
                self.send_once(prompt).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(&self, prompt: &str) -> Result<String, CoreError> {
        let existing_thread = self.thread_id();
        let (name, arguments) = match existing_thread {
            None => ("codex", serde_json::json!({ "prompt": prompt })),
            Some(thread_id) => ("codex-reply", serde_json::json!({ "thread_id": thread_id, "prompt": prompt })),
        };
        let (thread_id, text) = self.call_tool(name, arguments).await?;
        if let Some(thread_id) = thread_id {
            *self.thread_id.lock().unwrap() = Some(thread_id);
        }
        Ok(text)
    }

    /// Hard stop: kills the child, rejects all pending requests.
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
                buffer.push_str(&String::from_utf8_lossy(&raw[..n]));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        shared.handle_line(trimmed);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "mcp stdout read failed");
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

    fn script_options(script: &str) -> McpOptions {
        McpOptions {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            cwd: None,
            init_timeout: Duration::from_millis(2_000),
            tool_call_timeout: Duration::from_millis(2_000),
        }
    }

    #[tokio::test]
    async fn initialize_then_codex_then_codex_reply() {
        let script = r#"
            while IFS= read -r line; do
                id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
                case "$line" in
                    *initialize*)
                        echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"protocolVersion\":\"1\"}}"
                        ;;
                    *codex-reply*)
                        echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"structured_content\":{\"thread_id\":\"t1\"},\"content\":[{\"type\":\"text\",\"text\":\"second\"}]}}"
                        ;;
                    *)
                        echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"structured_content\":{\"thread_id\":\"t1\"},\"content\":[{\"type\":\"text\",\"text\":\"first\"}]}}"
                        ;;
                esac
            done
        "#;
        let process = McpProcess::new(script_options(script));
        let first = process.send("hello").await.expect("first turn");
        assert_eq!(first, "first");
        assert_eq!(process.thread_id().as_deref(), Some("t1"));

        let second = process.send("again").await.expect("second turn");
        assert_eq!(second, "second");
    }

    #[tokio::test]
    async fn init_failure_keeps_process_dead() {
        let process = McpProcess::new(script_options("exit 1"));
        let result = process.start().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recoverable_error_clears_thread_and_retries_once() {
        // The retry restarts the child in a brand-new process, so the
        // attempt counter has to live on disk rather than in a shell
        // variable to survive across the respawn.
        let counter_path = std::env::temp_dir().join(format!("conduit_mcp_retry_{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&counter_path);
        let script_template = r#"
            while IFS= read -r line; do
                id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
                case "$line" in
                    *initialize*)
                        echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{}}"
                        ;;
                    *)
                        count=$(cat __PATH__ 2>/dev/null || echo 0)
                        count=$((count+1))
                        echo $count > __PATH__
                        if [ "$count" -eq 1 ]; then
                            echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"error\":{\"code\":-1,\"message\":\"connection closed\"}}"
                        else
                            echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"structured_content\":{\"thread_id\":\"t2\"},\"content\":[{\"type\":\"text\",\"text\":\"recovered\"}]}}"
                        fi
                        ;;
                esac
            done
        "#;
        let script = script_template.replace("__PATH__", counter_path.to_str().unwrap());
        let process = McpProcess::new(script_options(&script));
        let result = process.send("hello").await.expect("recovers after one retry");
        assert_eq!(result, "recovered");
        let _ = std::fs::remove_file(&counter_path);
    }
}
