//! sessh-mcp server binary.
//!
//! Speaks MCP on stdin/stdout and shells out to sessh for every tool call.

use anyhow::Context;
use clap::Parser;
use sessh_config::Config;
use sessh_mcp::McpServer;

mod logging;

#[derive(Parser, Debug, Clone)]
#[command(name = "sessh-mcp")]
#[command(about = "MCP server exposing sessh remote session operations")]
#[command(version)]
struct Cli {
    /// sessh executable to run
    #[arg(long, env = "SESSH_BIN")]
    sessh_bin: Option<String>,

    /// Kill sessh calls running longer than this many seconds
    #[arg(long, env = "SESSH_MCP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Log filter, e.g. `debug` or `info,sessh_tool=debug`
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::from_env().with_json_logs(self.log_json);

        if let Some(bin) = self.sessh_bin.filter(|b| !b.trim().is_empty()) {
            config = config.with_sessh_bin(bin);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(secs);
        }
        if let Some(level) = self.log_level.filter(|l| !l.trim().is_empty()) {
            config = config.with_log_level(level);
        }

        config
    }
}

#[tokio::main]
async fn main() {
    let config = Cli::parse().into_config();

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("fatal: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        tracing::error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    tracing::info!(
        sessh_bin = %config.sessh_bin,
        timeout = ?config.call_timeout,
        "Starting sessh MCP server"
    );

    McpServer::from_config(&config)
        .serve_stdio()
        .await
        .context("MCP transport failed")?;

    Ok(())
}
