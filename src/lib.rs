/// Whistle MCP server library.
///
/// Exposes the Whistle REST API (provider search, OTP sign-in, profile and
/// whistle management) as Model Context Protocol tools over HTTP and STDIO.

pub mod core;
pub mod models;
pub mod tools;

pub use crate::core::config::Settings;
pub use crate::core::server::{McpServer, initialize_server};
