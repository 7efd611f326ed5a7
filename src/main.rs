use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use toolscout::{config::ENV_CONFIG, Gateway, GatewayConfig, ToolScoutServer};

#[derive(Parser, Debug)]
#[command(name = "toolscout", about = "Query-driven tool discovery gateway", version)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info", env = "TOOLSCOUT_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = GatewayConfig::load(cli.config.as_deref()).context("load config")?;
    config.validate().context("validate config")?;

    let gateway = Arc::new(Gateway::new(config).context("build gateway")?);
    gateway
        .initialize()
        .await
        .context("initialize gateway (index store or embedding service unreachable?)")?;

    let server = ToolScoutServer::new(Arc::clone(&gateway)).await;
    let running = server
        .serve(stdio())
        .await
        .context("start MCP server on stdio")?;

    info!("toolscout gateway serving on stdio");

    tokio::select! {
        result = running.waiting() => {
            result.context("server terminated")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    gateway.shutdown().await;
    Ok(())
}
