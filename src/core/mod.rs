/// Core Server Framework Module
///
/// This module contains the transport-independent server pieces:
/// - server.rs: MCP JSON-RPC handling with HTTP and STDIO transports
/// - config.rs / utils.rs: settings loaded from the environment
/// - http_client.rs: retrying client for the upstream REST API
/// - auth.rs, rate_limit.rs, logging.rs: the per-call pipeline stages
/// - error.rs: error types shared across the crate

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod rate_limit;
pub mod server;
pub mod utils;
