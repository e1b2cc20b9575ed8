use dotenv::dotenv;
use exchange_trading_mcp::{
    config::{Config, Transport},
    exchange::ExchangeRegistry,
    http,
    server::{self, McpServer},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Exchange Trading MCP Server...");

    let result = run().await;
    if let Err(e) = &result {
        error!("MCP server failed: {:#}", e);
    }
    result
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let server = Arc::new(McpServer::new(ExchangeRegistry::builtin()));

    match config.transport {
        Transport::Http => {
            info!("MCP server starting on {}", config.bind_addr());
            http::serve(server, &config.bind_addr()).await
        }
        Transport::Stdio => server::run_stdio(&server).await,
    }
}
