/// HTTP client for the upstream Whistle REST API.
///
/// Every tool goes through `ApiClient::send`, which applies the default
/// headers, resolves the endpoint against the configured base URL and retries
/// transient failures a bounded number of times with a fixed delay.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::config::ApiSettings;
use crate::core::error::ApiError;

/// One upstream call: method, endpoint relative to the base URL, optional
/// JSON body, query parameters and extra headers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    endpoint: String,
    body: Option<Value>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a query parameter. Pagination arguments are passed through this way.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header that overrides the client defaults for this request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Forward the caller's token as the `Authorization` header.
    pub fn bearer(self, access_token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), access_token)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    search_base_url: Option<String>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        if let Some(key) = &settings.api_key {
            // An API key with characters not allowed in headers is skipped
            // rather than failing every request.
            match HeaderValue::from_str(&format!("Bearer {key}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "API_KEY is not a valid header value, ignoring"),
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            search_base_url: settings
                .search_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            max_attempts: settings.max_retries.max(1),
            retry_delay: settings.retry_delay,
        })
    }

    /// Base URL an endpoint resolves against. Search endpoints may be routed
    /// to a dedicated base URL.
    pub fn base_url_for(&self, endpoint: &str) -> &str {
        let is_search = endpoint.trim_matches('/').starts_with("searchAround");
        match (&self.search_base_url, is_search) {
            (Some(search), true) => search,
            _ => &self.base_url,
        }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url_for(endpoint),
            endpoint.trim_start_matches('/')
        )
    }

    /// Send a request, retrying transient failures.
    ///
    /// At most `max_retries` attempts are made with `retry_delay` between
    /// them. Terminal failures and the last transient failure are returned
    /// unchanged.
    ///
    /// # Arguments
    /// * `request` - Method, endpoint, headers and optional JSON body
    ///
    /// # Returns
    /// * `Ok(Value)` - Parsed JSON body, or an empty object for an empty body
    /// * `Err(ApiError)` - Status, transport or decode failure
    pub async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let mut attempt = 1;
        loop {
            match self.send_once(&request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        endpoint = %request.endpoint,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "API request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let base_url = self.base_url_for(&request.endpoint);
        let url = self.url_for(&request.endpoint);

        info!(
            method = %request.method,
            url = %url,
            base_url = %base_url,
            has_data = request.body.is_some(),
            "Making API request"
        );

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    builder = builder.header(name, value);
                }
                _ => warn!(header = %name, "dropping header with invalid name or value"),
            }
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(error = %e, endpoint = %request.endpoint, base_url = %base_url, "API request error");
            ApiError::Transport(e)
        })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!(
                status_code = status.as_u16(),
                endpoint = %request.endpoint,
                base_url = %base_url,
                response_text = %text,
                "API request failed"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        info!(
            status_code = status.as_u16(),
            endpoint = %request.endpoint,
            base_url = %base_url,
            "API request successful"
        );

        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&text)?)
    }
}
