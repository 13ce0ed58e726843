/// Profile tools for a signed-in user: `toggle_visibility` and
/// `get_user_profile`. Both require the caller's access token.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::core::error::ToolError;
use crate::core::http_client::{ApiClient, ApiRequest};
use crate::core::server::{McpTool, ToolRegistry};
use crate::models::user::{UserProfile, UserProfileResponse};
use crate::tools::to_json;

#[derive(Debug, Deserialize)]
pub struct ToggleVisibilityArgs {
    pub access_token: String,
    pub visible: String,
}

impl ToggleVisibilityArgs {
    fn visible(&self) -> Result<bool, ToolError> {
        match self.visible.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ToolError::InvalidArguments(format!(
                "visible must be \"true\" or \"false\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GetUserProfileArgs {
    pub access_token: String,
}

pub fn register(registry: &mut ToolRegistry, api: Arc<ApiClient>) {
    let toggle_tool = McpTool {
        name: "toggle_visibility".to_string(),
        description: "Toggle user visibility status. Requires the access token returned by verify_otp.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "access_token": {
                    "type": "string",
                    "description": "User access token in the form 'Bearer <token>'"
                },
                "visible": {
                    "type": "string",
                    "enum": ["true", "false"],
                    "description": "Visibility status"
                }
            },
            "required": ["access_token", "visible"]
        }),
    };
    let client = api.clone();
    registry.register_async(toggle_tool, move |args: ToggleVisibilityArgs| {
        let api = client.clone();
        async move {
            let visible = args.visible()?;
            Ok(to_json(&toggle_visibility(&api, &args.access_token, visible).await))
        }
    });

    let profile_tool = McpTool {
        name: "get_user_profile".to_string(),
        description: "Get the profile of the signed-in user.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "access_token": {
                    "type": "string",
                    "description": "User access token in the form 'Bearer <token>'"
                }
            },
            "required": ["access_token"]
        }),
    };
    registry.register_async(profile_tool, move |args: GetUserProfileArgs| {
        let api = api.clone();
        async move { Ok(to_json(&get_user_profile(&api, &args.access_token).await)) }
    });
}

/// Map a `{"user": {...}}` upstream response onto the profile result.
pub fn profile_from_response(result: &Value) -> UserProfileResponse {
    let Some(user) = result.get("user").filter(|u| u.is_object()) else {
        return UserProfileResponse::missing();
    };
    match serde_json::from_value::<UserProfile>(user.clone()) {
        Ok(profile) => UserProfileResponse::found(profile),
        Err(e) => {
            warn!(error = %e, "User profile did not match the expected shape");
            UserProfileResponse::missing()
        }
    }
}

pub async fn toggle_visibility(
    api: &ApiClient,
    access_token: &str,
    visible: bool,
) -> UserProfileResponse {
    let request = ApiRequest::put("/user")
        .json(json!({ "visible": visible }))
        .bearer(access_token);

    match api.send(request).await {
        Ok(result) => {
            info!(visible, "Visibility updated");
            profile_from_response(&result)
        }
        Err(e) => {
            error!(error = %e, "Toggle visibility failed");
            UserProfileResponse::failed("Failed to update visibility. Please try again later.")
        }
    }
}

pub async fn get_user_profile(api: &ApiClient, access_token: &str) -> UserProfileResponse {
    match api.send(ApiRequest::get("/user").bearer(access_token)).await {
        Ok(result) => profile_from_response(&result),
        Err(e) => {
            error!(error = %e, "Get user profile failed");
            UserProfileResponse::failed("Failed to fetch user profile. Please try again later.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_flag_parsing() {
        let args = |v: &str| ToggleVisibilityArgs {
            access_token: "Bearer t".to_string(),
            visible: v.to_string(),
        };
        assert!(args("true").visible().unwrap());
        assert!(!args("false").visible().unwrap());
        assert!(matches!(
            args("yes").visible(),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_profile_from_response() {
        let found = profile_from_response(&json!({
            "user": {
                "_id": "u1",
                "id": "u1",
                "name": "Asha",
                "phone": "9994076214",
                "countryCode": "+91",
                "visible": false
            }
        }));
        assert!(found.success);
        assert_eq!(found.data.as_ref().map(|p| p.id.as_str()), Some("u1"));

        let missing = profile_from_response(&json!({"message": "ok"}));
        assert!(!missing.success);
        assert!(missing.data.is_none());
        assert!(missing.message.is_none());
    }
}
