//! Blaze MCP Server - Main binary

use anyhow::Result;
use blaze_mcp::config::TransportMode;
use blaze_mcp::transport::Transport;
use blaze_mcp::{McpServer, ServerConfig};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "blaze-mcp")]
#[command(about = "Model Context Protocol server for the Blaze FHIR server")]
#[command(version)]
struct Cli {
    /// Initial Blaze FHIR base URL
    #[arg(long, env = "BLAZE_MCP_BLAZE_BASE_URL", default_value = "http://localhost:8080/fhir")]
    blaze_base_url: String,

    /// Backend request timeout in seconds
    #[arg(long, env = "BLAZE_MCP_BLAZE_TIMEOUT", default_value_t = 30.0)]
    blaze_timeout: f64,

    /// Allow compaction and re-indexing tools
    #[arg(
        long,
        env = "BLAZE_MCP_ADMIN_TOOLS_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    admin_tools_enabled: bool,

    /// Page size used when a search gives none
    #[arg(long, env = "BLAZE_MCP_DEFAULT_PAGE_SIZE", default_value_t = 20)]
    default_page_size: u32,

    /// Upper bound for any page size argument
    #[arg(long, env = "BLAZE_MCP_MAX_PAGE_SIZE", default_value_t = 100)]
    max_page_size: u32,

    /// Transport mode
    #[arg(long, env = "BLAZE_MCP_TRANSPORT", value_enum, default_value_t = TransportMode::Stdio)]
    transport: TransportMode,

    /// Host to bind to for the SSE transport
    #[arg(long, env = "BLAZE_MCP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind to for the SSE transport
    #[arg(long, env = "BLAZE_MCP_PORT", default_value_t = 8000)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BLAZE_MCP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            blaze_base_url: cli.blaze_base_url,
            blaze_timeout: cli.blaze_timeout,
            admin_tools_enabled: cli.admin_tools_enabled,
            default_page_size: cli.default_page_size,
            max_page_size: cli.max_page_size,
            transport: cli.transport,
            host: cli.host,
            port: cli.port,
            log_level: cli.log_level,
        }
    }
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::new(&config.log_level);
    if config.transport == TransportMode::Stdio {
        // stdout carries the protocol
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    }
}

async fn run<T: Transport>(transport: T, server: McpServer, label: &str) {
    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(_) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    };

    tokio::select! {
        result = transport.start(Arc::new(server)) => {
            match result {
                Ok(_) => info!("{} transport completed", label),
                Err(e) => error!("{} transport error: {:#}", label, e),
            }
        }
        _ = shutdown_signal => {
            if let Err(e) = transport.shutdown().await {
                error!("Error during {} transport shutdown: {}", label, e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from(Cli::parse());
    init_tracing(&config);

    info!("Starting Blaze MCP Server v{}", blaze_mcp::VERSION);
    info!(
        blaze_url = %config.blaze_base_url,
        transport = ?config.transport,
        admin_tools = config.admin_tools_enabled,
        "Server configuration loaded"
    );

    let server = McpServer::new(config.clone())?;

    match config.transport {
        TransportMode::Stdio => {
            #[cfg(feature = "stdio-transport")]
            run(blaze_mcp::transport::stdio::StdioTransport::new(), server, "stdio").await;
            #[cfg(not(feature = "stdio-transport"))]
            anyhow::bail!("built without the stdio transport");
        }
        TransportMode::Sse => {
            info!("Starting SSE transport on {}:{}", config.host, config.port);
            #[cfg(feature = "http-transport")]
            run(
                blaze_mcp::transport::http::HttpTransport::new(config.host.clone(), config.port),
                server,
                "SSE",
            )
            .await;
            #[cfg(not(feature = "http-transport"))]
            anyhow::bail!("built without the HTTP transport");
        }
    }

    info!("Blaze MCP Server shutdown complete");
    Ok(())
}
