//! Stdin-driven line REPL (spec §6's external interfaces minus the real
//! transport gateway, which is out of scope). Every line becomes one
//! agent-loop request against the channel key passed on the command line;
//! `exit`/`quit` ends the session.

use std::sync::Arc;

use conduit_agent::{AgentLoop, RunOptions};
use conduit_core::types::ContentBlock;
use conduit_core::ChannelKey;
use conduit_pool::SubprocessPool;
use conduit_process::stream_json::StreamJsonProcess;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    agent_loop: Arc<AgentLoop>,
    pool: Arc<SubprocessPool<StreamJsonProcess>>,
    channel: String,
) -> anyhow::Result<()> {
    let channel_key = ChannelKey::new(channel.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("conduit-daemon: type a message, or \"exit\" to quit");
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        let driver = match pool.get(channel_key.as_str()).await {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("failed to start subprocess: {e}");
                continue;
            }
        };

        let content = vec![ContentBlock::text(trimmed.to_string())];
        match agent_loop.run(&channel_key, driver.as_ref(), content, RunOptions::default()).await {
            Ok(outcome) => println!("{}", outcome.response),
            Err(e) => eprintln!("error [{}]: {e}", e.code()),
        }
    }

    pool.stop_all().await;
    Ok(())
}
