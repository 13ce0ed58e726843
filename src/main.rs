/// MCP Server Entry Point
///
/// Loads settings from the environment (and `.env` when present), sets up
/// logging, builds the server with every Whistle tool registered and starts
/// the configured transport.
///
/// Environment Variables (see `Settings::from_env` for the full list):
/// - TRANSPORT_MODE: "stdio", "http", or "both" (default: "http")
/// - HOST / PORT: bind address for HTTP mode (default: 0.0.0.0:3000)
/// - EXPRESS_API_BASE_URL: upstream Whistle API
/// - OPENAI_API_KEY: enables natural-language whistle creation

use std::sync::Arc;

use tracing::error;

use whistle_mcp_server::core::config::{Settings, TransportMode};
use whistle_mcp_server::core::logging::init_logging;
use whistle_mcp_server::core::server::{self, initialize_server};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // A missing .env file is fine; real environment variables win.
    let _ = dotenvy::dotenv();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&settings);
    settings.log_summary();

    let mcp_server = match initialize_server(&settings) {
        Ok(mcp_server) => Arc::new(mcp_server),
        Err(e) => {
            error!(error = %e, "Failed to initialize server");
            std::process::exit(1);
        }
    };

    match settings.transport {
        TransportMode::Stdio => server::run_server_stdio(mcp_server).await,
        TransportMode::Http => server::run_server_http(mcp_server, &settings).await,
        TransportMode::Both => {
            // STDIO runs in the background so HTTP endpoints stay available.
            let stdio_server = mcp_server.clone();
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_server).await {
                    error!(error = %e, "STDIO server error");
                }
            });

            let http_result = server::run_server_http(mcp_server, &settings).await;

            // If HTTP server exits, abort STDIO task
            stdio_handle.abort();

            http_result
        }
    }
}
