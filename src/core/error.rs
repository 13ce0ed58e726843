/// Error types shared by the server, the upstream client and the tools.

use thiserror::Error;

/// Invalid or missing configuration detected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failure talking to the upstream REST API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The upstream answered with a non-2xx status. The body is kept verbatim.
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON in API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether another attempt may succeed.
    ///
    /// Timeouts, connection failures, 408, 429 and 5xx are transient. Every
    /// other status and undecodable bodies are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            ApiError::Transport(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            ApiError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }
}

/// Failure of the language-model attribute extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("OpenAI API error: {0}")]
    Api(#[from] ApiError),

    #[error("OpenAI response contained no message content")]
    EmptyResponse,

    #[error("Invalid JSON response from OpenAI: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Failure of a single `tools/call` invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded for {0}. Please try again later.")]
    RateLimited(String),
}

impl ToolError {
    /// JSON-RPC error code for failures reported as protocol errors rather
    /// than as `isError` tool results.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            ToolError::RateLimited(_) => Some(-32000),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| ApiError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_decode_is_terminal() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!ApiError::from(err).is_transient());
    }

    #[test]
    fn test_rate_limited_maps_to_rpc_error() {
        let err = ToolError::RateLimited("sign_in".to_string());
        assert_eq!(err.rpc_code(), Some(-32000));
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for sign_in. Please try again later."
        );
        assert_eq!(ToolError::Unauthorized("no".into()).rpc_code(), None);
    }
}
