/// MCP Server Implementation
///
/// This module contains the core MCP server implementation including:
/// - JSON-RPC 2.0 request/response structures
/// - Tool registry with async handlers
/// - The per-call pipeline (logging, rate limiting, auth guard)
/// - HTTP server setup with Actix Web
/// - STDIO server implementation for line-based communication

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::{Method, header},
    middleware::{Compress, Condition, DefaultHeaders, Logger},
    web,
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::core::auth::{self, CallContext};
use crate::core::config::Settings;
use crate::core::error::{ApiError, ToolError};
use crate::core::http_client::ApiClient;
use crate::core::logging::{argument_keys, has_auth_token, sanitize_arguments};
use crate::core::rate_limit::RateLimiter;
use crate::tools;
use crate::tools::extractor::OpenAiExtractor;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request. A missing `id` marks a notification.
#[derive(Deserialize, Debug, Clone)]
pub struct McpRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response carrying either a result or an error.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool definition as reported by `tools/list`.
#[derive(Serialize, Debug, Clone)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub type ToolFuture = BoxFuture<'static, Result<Value, ToolError>>;

/// Tool handlers take the raw JSON arguments and resolve to a JSON result.
pub type ToolHandler = Box<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Registry of available MCP tools.
///
/// Keeps the definitions in registration order for `tools/list` and the
/// handlers by name for `tools/call`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<McpTool>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: McpTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }

    /// Register a handler over typed arguments.
    ///
    /// Arguments that fail to deserialize into `A` produce
    /// `ToolError::InvalidArguments` without calling the handler.
    pub fn register_async<A, F, Fut>(&mut self, tool: McpTool, handler: F)
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Box::new(move |args: Value| -> ToolFuture {
            match serde_json::from_value::<A>(args) {
                Ok(parsed) => Box::pin(handler(parsed)),
                Err(e) => {
                    let err = ToolError::InvalidArguments(e.to_string());
                    Box::pin(async move { Err(err) })
                }
            }
        });
        self.register(tool, handler);
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolHandler> {
        self.handlers.get(name)
    }
}

/// Server metadata reported by `initialize` and `/health`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

/// Transport-independent MCP request handling.
pub struct McpServer {
    info: ServerInfo,
    registry: ToolRegistry,
    rate_limiter: RateLimiter,
    requests: AtomicU64,
}

impl McpServer {
    pub fn new(info: ServerInfo, registry: ToolRegistry, rate_limiter: RateLimiter) -> Self {
        Self {
            info,
            registry,
            rate_limiter,
            requests: AtomicU64::new(0),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn tools(&self) -> &[McpTool] {
        self.registry.tools()
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Parse one raw JSON-RPC message and handle it.
    ///
    /// Returns `None` for notifications. Unparseable input yields a parse
    /// error response, echoing the `id` when it can still be recovered.
    pub async fn handle_message(&self, raw: &str, context: &CallContext) -> Option<McpResponse> {
        match serde_json::from_str::<McpRequest>(raw) {
            Ok(request) => self.handle(request, context).await,
            Err(e) => {
                error!(error = %e, "Parse error");
                let id = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("id").cloned());
                Some(McpResponse::error(id, -32700, format!("Parse error: {e}")))
            }
        }
    }

    /// Handle a parsed request, logging start, completion and failure.
    pub async fn handle(&self, request: McpRequest, context: &CallContext) -> Option<McpResponse> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let tool_name = tool_call_name(&request);
        let arguments = request
            .params
            .as_ref()
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or(Value::Null);
        info!(
            method = %request.method,
            tool_name = tool_name.as_deref().unwrap_or(""),
            argument_keys = ?argument_keys(&arguments),
            has_auth_token = has_auth_token(&arguments),
            "MCP message started"
        );
        debug!(arguments = %sanitize_arguments(&arguments), "MCP message arguments");

        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => McpResponse::result(Some(id), self.initialize_result()),
            "ping" => McpResponse::result(Some(id), json!({})),
            "tools/list" => McpResponse::result(Some(id), json!({ "tools": self.tools() })),
            "tools/call" => self.call_tool(Some(id), request.params, context).await,
            other => McpResponse::error(Some(id), -32601, format!("Method not found: {other}")),
        };

        let execution_time_ms = elapsed_ms(started.elapsed());
        match &response.error {
            Some(err) => error!(
                method = %request.method,
                error = %err.message,
                code = err.code,
                execution_time_ms,
                "MCP message failed"
            ),
            None => info!(
                method = %request.method,
                execution_time_ms,
                success = true,
                "MCP message completed"
            ),
        }
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version
            }
        })
    }

    /// Handle `tools/call`: look up the tool, apply the rate limit and the
    /// auth guard, then run the handler.
    async fn call_tool(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        context: &CallContext,
    ) -> McpResponse {
        let Some(params) = params else {
            return McpResponse::error(id, -32602, "Invalid params");
        };

        let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let mut arguments = params
            .get("arguments")
            .cloned()
            .filter(|a| !a.is_null())
            .unwrap_or_else(|| json!({}));

        let Some(handler) = self.registry.get(tool_name) else {
            return McpResponse::error(id, -32601, format!("Unknown tool: {tool_name}"));
        };

        if let Err(e) = self.rate_limiter.check(tool_name, &arguments) {
            return McpResponse::error(id, e.rpc_code().unwrap_or(-32000), e.to_string());
        }

        if let Err(e) = auth::authorize(tool_name, context, &mut arguments) {
            return McpResponse::result(id, tool_result(&Value::String(format!("Error: {e}")), true));
        }

        match handler(arguments).await {
            Ok(result) => McpResponse::result(id, tool_result(&result, false)),
            Err(e) => match e.rpc_code() {
                Some(code) => McpResponse::error(id, code, e.to_string()),
                None => {
                    error!(tool_name, error = %e, "tool execution failed");
                    McpResponse::result(id, tool_result(&Value::String(format!("Error: {e}")), true))
                }
            },
        }
    }
}

/// MCP `tools/call` result. Strings are sent as-is, other values as JSON text.
fn tool_result(value: &Value, is_error: bool) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "isError": is_error
    })
}

fn tool_call_name(request: &McpRequest) -> Option<String> {
    if request.method != "tools/call" {
        return None;
    }
    request
        .params
        .as_ref()
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn elapsed_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// Build the server with every tool registered against the configured
/// upstream.
pub fn initialize_server(settings: &Settings) -> Result<McpServer, ApiError> {
    let api = Arc::new(ApiClient::new(&settings.api)?);
    let extractor = Arc::new(OpenAiExtractor::new(&settings.openai)?);

    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, api, extractor);

    Ok(McpServer::new(
        ServerInfo {
            name: settings.server_name.clone(),
            version: settings.server_version.clone(),
            environment: settings.environment.to_string(),
        },
        registry,
        RateLimiter::new(settings.rate_limit_per_minute),
    ))
}

/// Health check endpoint handler.
async fn health(server: web::Data<McpServer>) -> HttpResponse {
    let info = server.info();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": info.name,
        "environment": info.environment,
        "version": info.version,
        "middleware": ["logging", "rate_limit", "auth"]
    }))
}

/// Returns the total number of MCP messages handled since start.
async fn metrics_handler(server: web::Data<McpServer>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "requests_total": server.request_count(),
        "tools_registered": server.tools().len(),
        "status": "ok"
    }))
}

/// Server-Sent Events endpoint for tools discovery.
///
/// Sends the registered tools as a single SSE event.
async fn sse_tools_discovery(server: web::Data<McpServer>) -> HttpResponse {
    let tools_data = json!({
        "tools": server.tools(),
        "count": server.tools().len()
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable proxy buffering for streaming.
        .insert_header(("x-accel-buffering", "no"))
        .body(format!("data: {tools_data}\n\n"))
}

/// JSON-RPC endpoint. Authorization and X-User-Id headers are handed to the
/// auth guard.
async fn mcp_handler(server: web::Data<McpServer>, req: HttpRequest, body: String) -> HttpResponse {
    let header_value = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let context = CallContext {
        authorization: header_value(header::AUTHORIZATION.as_str()),
        user_id: header_value("x-user-id"),
    };

    match server.handle_message(&body, &context).await {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::Accepted().finish(),
    }
}

/// CORS preflight. Headers are added by the CORS middleware.
async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// Register the HTTP routes. Shared by the server and the HTTP tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/sse", web::get().to(sse_tools_discovery))
        .route("/mcp", web::post().to(mcp_handler))
        .route("/", web::post().to(mcp_handler))
        .route("/", web::get().to(health));
}

/// Run the MCP server in HTTP mode.
///
/// The server is configured with:
/// - Worker threads from settings (CPU count, max 16, by default)
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive and request timeout: 30 seconds
/// - CORS headers and preflight handling in development only
pub async fn run_server_http(server: Arc<McpServer>, settings: &Settings) -> std::io::Result<()> {
    let bind_addr = settings.bind_addr();
    let workers = settings.workers;
    let cors_enabled = settings.is_development();
    let cors_origins = settings.cors.origins.clone();
    let cors_methods = settings.cors.methods.join(", ");
    let cors_headers = settings.cors.headers.join(", ");

    info!(
        name = %server.info().name,
        version = %server.info().version,
        bind_addr = %bind_addr,
        workers,
        cors_enabled,
        "MCP server starting (HTTP mode)"
    );

    let server_data = web::Data::from(server);

    HttpServer::new(move || {
        App::new()
            .app_data(server_data.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .wrap(Condition::new(
                cors_enabled,
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", cors_origins.clone()))
                    .add(("Access-Control-Allow-Methods", cors_methods.clone()))
                    .add(("Access-Control-Allow-Headers", cors_headers.clone()))
                    .add(("Access-Control-Allow-Credentials", "true")),
            ))
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure_routes)
            .route("/mcp", web::method(Method::OPTIONS).to(preflight))
            .route("/", web::method(Method::OPTIONS).to(preflight))
    })
    .workers(workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads JSON-RPC requests line by line from stdin and writes one response
/// line per request to stdout. Logs go to stderr.
pub async fn run_server_stdio(server: Arc<McpServer>) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

    info!(
        name = %server.info().name,
        version = %server.info().version,
        "MCP server starting (STDIO mode)"
    );

    let mut stdin = BufReader::with_capacity(8192, tokio::io::stdin()).lines();
    let mut stdout = BufWriter::with_capacity(8192, tokio::io::stdout());
    let context = CallContext::default();

    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = server.handle_message(&line, &context).await else {
            continue;
        };

        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Error serializing response");
                continue;
            }
        };

        stdout.write_all(response_json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        // Flush per response; the client waits on each line.
        stdout.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_server() -> McpServer {
        #[derive(Deserialize)]
        struct RepeatArgs {
            message: String,
        }

        let mut registry = ToolRegistry::new();
        registry.register_async(
            McpTool {
                name: "repeat".to_string(),
                description: "Repeat a message back".to_string(),
                input_schema: json!({"type": "object"}),
            },
            |args: RepeatArgs| async move { Ok(json!({ "result": args.message })) },
        );
        registry.register_async(
            McpTool {
                name: "list_whistles".to_string(),
                description: "protected".to_string(),
                input_schema: json!({"type": "object"}),
            },
            |args: Value| async move { Ok(args) },
        );
        McpServer::new(
            ServerInfo {
                name: "test".to_string(),
                version: "0.0.1".to_string(),
                environment: "development".to_string(),
            },
            registry,
            RateLimiter::new(2),
        )
    }

    fn call(name: &str, arguments: Value) -> McpRequest {
        McpRequest::new(
            Some(json!(1)),
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let server = fixture_server();
        let ctx = CallContext::default();

        let init = server
            .handle(McpRequest::new(Some(json!(1)), "initialize", None), &ctx)
            .await
            .unwrap();
        let result = init.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test");

        let list = server
            .handle(McpRequest::new(Some(json!(2)), "tools/list", None), &ctx)
            .await
            .unwrap();
        let tools = &list.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "repeat");
        assert!(tools[0].get("inputSchema").is_some());
    }

    #[tokio::test]
    async fn test_call_tool_success_and_invalid_arguments() {
        let server = fixture_server();
        let ctx = CallContext::default();

        let ok = server.handle(call("repeat", json!({"message": "hi"})), &ctx).await.unwrap();
        let result = ok.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"result": "hi"}));

        let bad = server.handle(call("repeat", json!({})), &ctx).await.unwrap();
        let result = bad.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Error: Invalid arguments"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = fixture_server();
        let ctx = CallContext::default();

        let unknown = server
            .handle(McpRequest::new(Some(json!(1)), "resources/list", None), &ctx)
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, -32601);

        let no_params = server
            .handle(McpRequest::new(Some(json!(1)), "tools/call", None), &ctx)
            .await
            .unwrap();
        assert_eq!(no_params.error.unwrap().code, -32602);

        let unknown_tool = server.handle(call("nope", json!({})), &ctx).await.unwrap();
        assert_eq!(unknown_tool.error.unwrap().code, -32601);

        let parse = server
            .handle_message(r#"{"id": 7, "method": 5}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(parse.id, Some(json!(7)));
        assert_eq!(parse.error.unwrap().code, -32700);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let server = fixture_server();
        let response = server
            .handle_message(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                &CallContext::default(),
            )
            .await;
        assert!(response.is_none());
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_a_protocol_error() {
        let server = fixture_server();
        let ctx = CallContext::default();
        for _ in 0..2 {
            let r = server.handle(call("repeat", json!({"message": "x"})), &ctx).await.unwrap();
            assert!(r.error.is_none());
        }
        let limited = server.handle(call("repeat", json!({"message": "x"})), &ctx).await.unwrap();
        let err = limited.error.unwrap();
        assert_eq!(err.code, -32000);
        assert!(err.message.contains("Rate limit exceeded for repeat"));
    }

    #[tokio::test]
    async fn test_auth_guard_runs_before_handler() {
        let server = fixture_server();

        let denied = server
            .handle(call("list_whistles", json!({})), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(denied.result.unwrap()["isError"], true);

        let ctx = CallContext {
            authorization: Some("Bearer tok".to_string()),
            user_id: None,
        };
        let allowed = server.handle(call("list_whistles", json!({})), &ctx).await.unwrap();
        let text = allowed.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let echoed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(echoed["access_token"], "Bearer tok");
    }
}
