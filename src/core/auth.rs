/// Access-token guard for tools that act on behalf of a signed-in user.
///
/// The upstream API validates tokens; this guard only makes sure one in the
/// `Bearer <token>` form is present and that it reaches the tool arguments.

use serde_json::Value;
use tracing::{info, warn};

use crate::core::error::ToolError;

pub const PROTECTED_TOOLS: &[&str] = &[
    "toggle_visibility",
    "get_user_profile",
    "create_whistle",
    "list_whistles",
];

pub const PROTECTED_TOOL_ERROR_MESSAGE: &str = "Authentication required. Sign in with sign_in and verify_otp, then pass the returned token as access_token in the form 'Bearer <token>'.";

/// Transport-level caller information. HTTP requests fill this from headers;
/// STDIO callers leave it empty.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Raw `X-User-Id` header value.
    pub user_id: Option<String>,
}

pub fn is_protected(tool_name: &str) -> bool {
    PROTECTED_TOOLS.contains(&tool_name)
}

fn is_bearer(token: &str) -> bool {
    token
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
}

/// Enforce token presence for protected tools.
///
/// A Bearer `Authorization` header takes precedence over the `access_token`
/// argument. The resolved token is inserted as `access_token` and the user
/// id header as `user_id`, but explicit arguments are never overwritten.
///
/// # Arguments
/// * `tool_name` - Tool being called; unprotected tools pass through
/// * `context` - Headers of the incoming call
/// * `arguments` - Call arguments, updated in place with the resolved token
///
/// # Returns
/// * `Ok(())` - Tool is unprotected or a Bearer token was found
/// * `Err(ToolError::Unauthorized)` - Token missing or not a Bearer token
pub fn authorize(
    tool_name: &str,
    context: &CallContext,
    arguments: &mut Value,
) -> Result<(), ToolError> {
    if !is_protected(tool_name) {
        return Ok(());
    }

    let header_token = context
        .authorization
        .as_deref()
        .map(str::trim)
        .filter(|h| is_bearer(h));

    let access_token = header_token.map(str::to_string).or_else(|| {
        arguments
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    });

    let access_token = match access_token {
        Some(token) if is_bearer(&token) => token,
        other => {
            warn!(
                tool_name,
                token_present = other.is_some(),
                "Protected tool accessed without valid token"
            );
            return Err(ToolError::Unauthorized(
                PROTECTED_TOOL_ERROR_MESSAGE.to_string(),
            ));
        }
    };

    if !arguments.is_object() {
        *arguments = Value::Object(Default::default());
    }
    if let Some(map) = arguments.as_object_mut() {
        map.entry("access_token")
            .or_insert_with(|| Value::String(access_token));
        if let Some(user_id) = context.user_id.as_deref().filter(|u| !u.is_empty()) {
            map.entry("user_id")
                .or_insert_with(|| Value::String(user_id.to_string()));
        }
    }

    info!(tool_name, "Token provided for protected tool");
    Ok(())
}
