//! Conduit daemon entry point. Grounded on `skynet-gateway/src/main.rs`
//! (env-filter tracing init, config-load-with-fallback-and-warn, building a
//! shared `Arc` state once and handing it to a driver loop). Unlike the
//! teacher, there is no axum/websocket transport here (out of scope per
//! spec §1) — the driver loop is a stdin line REPL for manually exercising
//! the agent loop against a single channel key.

mod repl;

use std::sync::Arc;

use clap::Parser;
use conduit_agent::AgentLoop;
use conduit_core::config::SubprocessConfig;
use conduit_core::ConduitConfig;
use conduit_lanes::LaneScheduler;
use conduit_pool::SubprocessPool;
use conduit_process::stream_json::{ProcessOptions, StreamJsonProcess};
use conduit_sessions::{SessionPool, SessionPoolConfig};
use conduit_tools::{InMemoryMemoryStore, ToolExecutor};

mod facades;

#[derive(Parser, Debug)]
#[command(name = "conduit-daemon", about = "Agent loop orchestrator development harness")]
struct Cli {
    /// Explicit config path; falls back to CONDUIT_CONFIG then ~/.conduit/conduit.toml.
    #[arg(long)]
    config: Option<String>,

    /// Channel key to drive in the REPL (spec §3's ChannelKey, e.g. "cli:repl").
    #[arg(long, default_value = "cli:repl")]
    channel: String,
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/{rest}")
    } else {
        path.to_string()
    }
}

fn session_pool_config(cfg: &conduit_core::config::SessionPoolConfig) -> SessionPoolConfig {
    SessionPoolConfig {
        session_timeout_ms: cfg.session_timeout_ms,
        max_sessions: cfg.max_sessions,
        context_threshold_tokens: cfg.context_threshold_tokens,
        context_warning_fraction: cfg.context_warning_fraction,
    }
}

fn resolve_cli_argv(subprocess: &SubprocessConfig) -> Vec<String> {
    let program = subprocess.command_override.clone().unwrap_or_else(|| "claude".to_string());
    let mut argv = vec![
        program,
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    if subprocess.dangerously_skip_permissions {
        argv.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(model) = &subprocess.model_override {
        argv.push("--model".to_string());
        argv.push(model.clone());
    }
    argv
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "conduit_daemon=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ConduitConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        ConduitConfig::default()
    });

    let sandbox_dir = expand_home(&config.tools.agent_home);
    std::fs::create_dir_all(&sandbox_dir)?;

    let sessions = Arc::new(SessionPool::new(session_pool_config(&config.sessions)));
    let lanes = Arc::new(LaneScheduler::new(&config.lanes));

    let subprocess_config = config.subprocess.clone();
    let argv = resolve_cli_argv(&subprocess_config);
    let request_timeout = std::time::Duration::from_millis(subprocess_config.request_timeout_ms);
    let pool = Arc::new(SubprocessPool::new(move || {
        StreamJsonProcess::new(ProcessOptions {
            argv: argv.clone(),
            cwd: None,
            request_timeout,
        })
    }));

    let memory: Arc<dyn conduit_tools::MemoryStore> = Arc::new(InMemoryMemoryStore::new());
    let gateway: Arc<dyn conduit_tools::GatewayFacade> = Arc::new(facades::StubGateway);
    let browser: Arc<dyn conduit_tools::BrowserFacade> = Arc::new(facades::StubBrowser);
    let tools = Arc::new(ToolExecutor::new(sandbox_dir.clone(), memory.clone(), gateway, browser));

    let agent_loop = Arc::new(AgentLoop::new(
        sessions,
        Some(lanes),
        tools,
        memory,
        sandbox_dir,
        config.loop_.clone(),
        config.tools.contract_save_limit,
    ));

    tracing::info!(channel = %cli.channel, "conduit-daemon starting REPL harness");
    repl::run(agent_loop, pool, cli.channel).await
}
