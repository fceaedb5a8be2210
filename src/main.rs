//! `toolrelay <config.yaml> [user-id]`: chat with the agent on stdin/stdout.
//!
//! Logs go to `$TOOLRELAY_LOG_DIR` (default: `<data dir>/logs`) as JSON lines
//! so the terminal only carries the conversation.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use toolrelay::config::load_config;
use toolrelay::{init_tracing, AgentRuntime, LogTarget};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: toolrelay <config.yaml> [user-id]")?;
    let user_id = args.next().unwrap_or_else(|| "local".to_string());

    let log_dir = std::env::var_os("TOOLRELAY_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| toolrelay::data_dir().join("logs"));
    init_tracing(LogTarget::JsonFile(log_dir))?;

    let config = load_config(&config_path)?;
    let runtime = AgentRuntime::create(config, None)?;
    for (name, error) in runtime.start().await {
        eprintln!("tool server {name} unavailable: {error}");
    }
    eprintln!(
        "{} tools ready. Ctrl-C aborts a running turn; Ctrl-D or an idle Ctrl-C quits.",
        runtime.registry().tool_count()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let control = runtime.chat().turn_control().with_cancel(cancel.clone());
        let turn = runtime.chat().send_message(
            &user_id,
            text,
            runtime.config().agent.rag,
            &control,
        );
        tokio::pin!(turn);

        let result = tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };
        match result {
            Ok(reply) => println!("{}", reply.text),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    runtime.shutdown().await;
    tracing::info!(user_id, "session ended");
    Ok(())
}
