//! `Bash` tool execution primitive. Grounded directly on
//! `skynet-terminal/src/manager.rs`'s `exec()`: spawn via `sh -c`, race
//! `wait_with_output()` against a wall-clock timeout using a spawned task
//! plus a oneshot channel, SIGKILL the child on timeout, truncate captured
//! output.

use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct BashOptions {
    pub cwd: Option<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for BashOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout: Duration::from_secs(60),
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BashResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

pub async fn run(command: &str, opts: BashOptions) -> Result<BashResult, String> {
    let mut cmd = AsyncCommand::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;
    let pid = child.id();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let output = child.wait_with_output().await;
        let _ = tx.send(output);
    });

    match tokio::time::timeout(opts.timeout, rx).await {
        Ok(Ok(Ok(output))) => Ok(BashResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(&strip_ansi(&output.stdout), opts.max_output_bytes),
            stderr: truncate_output(&strip_ansi(&output.stderr), opts.max_output_bytes),
            timed_out: false,
        }),
        Ok(Ok(Err(e))) => Err(format!("command failed: {e}")),
        Ok(Err(_)) => Err("internal channel closed unexpectedly".to_string()),
        Err(_) => {
            if let Some(pid) = pid {
                kill_pid(pid);
            }
            Ok(BashResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("command timed out after {:?}", opts.timeout),
                timed_out: true,
            })
        }
    }
}

fn strip_ansi(bytes: &[u8]) -> String {
    let cleaned = strip_ansi_escapes::strip(bytes);
    String::from_utf8_lossy(&cleaned).into_owned()
}

fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated at {max_bytes} bytes]", &text[..end])
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let result = run("echo hello", BashOptions::default()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let opts = BashOptions {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let result = run("sleep 5", opts).await.unwrap();
        assert!(result.timed_out);
    }

    #[tokio::test]
    async fn captures_nonzero_exit_code() {
        let result = run("exit 3", BashOptions::default()).await.unwrap();
        assert_eq!(result.exit_code, 3);
    }
}
