mod common;

use std::sync::Arc;

use actix_web::{App, http::StatusCode, test, web};
use httpmock::prelude::*;
use serde_json::{Value, json};
use whistle_mcp_server::core::server::{configure_routes, initialize_server};

fn rpc(id: i64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

fn tool_text(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

macro_rules! app_for {
    ($upstream:expr) => {{
        let settings = common::settings(&[
            ("EXPRESS_API_BASE_URL", $upstream.base_url().as_str()),
            ("RETRY_DELAY", "0.01"),
        ]);
        let server = Arc::new(initialize_server(&settings).unwrap());
        test::init_service(
            App::new()
                .app_data(web::Data::from(server))
                .configure(configure_routes),
        )
        .await
    }};
}

#[actix_rt::test]
async fn test_health_and_metrics() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "whistle-mcp-server");
    assert_eq!(body["environment"], "development");

    let req = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(1, "ping", json!({})))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["requests_total"], 1);
}

#[actix_rt::test]
async fn test_initialize_and_list_tools() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(1, "initialize", json!({})))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "whistle-mcp-server");

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(rpc(2, "tools/list", json!({})))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let mut names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "create_whistle",
            "get_user_profile",
            "list_whistles",
            "resend_otp",
            "search_businesses",
            "sign_in",
            "toggle_visibility",
            "verify_otp",
        ]
    );
}

#[actix_rt::test]
async fn test_sse_discovery() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    let req = test::TestRequest::get().uri("/sse").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = test::read_body(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"count\":8"));
}

#[actix_rt::test]
async fn test_notifications_and_protocol_errors() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(3, "prompts/list", json!({})))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 3);
}

#[actix_rt::test]
async fn test_protected_tool_requires_token() {
    let upstream = MockServer::start_async().await;
    let mock = upstream
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({"user": {"Whistles": []}}));
        })
        .await;
    let app = app_for!(upstream);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(1, "tools/call", json!({"name": "list_whistles", "arguments": {}})))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["result"]["isError"], true);
    assert!(
        tool_text(&body)
            .as_str()
            .unwrap()
            .contains("Authentication required")
    );

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(
            2,
            "tools/call",
            json!({"name": "list_whistles", "arguments": {"access_token": "not-bearer"}}),
        ))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["result"]["isError"], true);

    mock.assert_hits_async(0).await;
}

#[actix_rt::test]
async fn test_bearer_header_reaches_upstream() {
    let upstream = MockServer::start_async().await;
    let mock = upstream
        .mock_async(|when, then| {
            when.method(GET)
                .path("/user")
                .header("authorization", "Bearer header-token");
            then.status(200).json_body(json!({
                "user": {"Whistles": [{"_id": "w1", "description": "Need a tutor"}]}
            }));
        })
        .await;
    let app = app_for!(upstream);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .insert_header(("Authorization", "Bearer header-token"))
        .insert_header(("X-User-Id", "u1"))
        .set_json(rpc(
            1,
            "tools/call",
            json!({"name": "list_whistles", "arguments": {"active_only": true}}),
        ))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    mock.assert_async().await;
    assert_eq!(body["result"]["isError"], false);
    let result = tool_text(&body);
    assert_eq!(result["status"], "success");
    assert_eq!(result["whistles"][0]["id"], "w1");
}

#[actix_rt::test]
async fn test_rate_limited_tool_call() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    // resend_otp allows 3 calls per minute; a phone-like id fails locally.
    let call = |id| {
        test::TestRequest::post()
            .uri("/mcp")
            .set_json(rpc(
                id,
                "tools/call",
                json!({"name": "resend_otp", "arguments": {"user_id": "9994076214"}}),
            ))
            .to_request()
    };

    for id in 1..=3 {
        let body: Value = test::call_and_read_body_json(&app, call(id)).await;
        assert!(body.get("error").is_none() || body["error"].is_null());
        assert_eq!(tool_text(&body)["success"], false);
    }

    let body: Value = test::call_and_read_body_json(&app, call(4)).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(
        body["error"]["message"],
        "Rate limit exceeded for resend_otp. Please try again later."
    );
}

#[actix_rt::test]
async fn test_invalid_tool_arguments() {
    let upstream = MockServer::start_async().await;
    let app = app_for!(upstream);

    let req = test::TestRequest::post()
        .uri("/mcp")
        .set_json(rpc(
            1,
            "tools/call",
            json!({"name": "search_businesses", "arguments": {"latitude": 1.0, "longitude": 2.0, "radius": 0}}),
        ))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(
        tool_text(&body),
        json!("Error: Invalid arguments: radius must be between 1 and 1000")
    );
}
