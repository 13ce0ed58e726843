/// OTP sign-in tools: `sign_in`, `verify_otp`, `resend_otp`.
///
/// Input is validated and normalized locally so obvious mistakes (phone
/// number passed as user id, country code glued to the number) are caught
/// before the upstream is called. Every failure is returned as an
/// `AuthErrorResponse` rather than a tool error so the agent can read it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::core::http_client::{ApiClient, ApiRequest};
use crate::core::server::{McpTool, ToolRegistry};
use crate::models::auth::{
    AuthErrorResponse, ResendOtpRequest, ResendOtpResponse, SignInRequest, SignInResponse,
    SignInUser, VerifyOtpRequest, VerifyOtpResponse, VerifyOtpUser,
};
use crate::tools::{bool_of, str_of, to_json};

static INTERNATIONAL_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+\d{1,3})(\d+)$").expect("valid phone regex"));

#[derive(Debug, Deserialize)]
pub struct SignInArgs {
    pub phone: String,
    pub country_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpArgs {
    pub otp_code: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendOtpArgs {
    pub user_id: String,
}

pub fn register(registry: &mut ToolRegistry, api: Arc<ApiClient>) {
    let sign_in_tool = McpTool {
        name: "sign_in".to_string(),
        description: "Authenticate user with phone, country code, name, latitude and longitude using OTP verification. Returns the user id and sends an OTP to the phone.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "phone": {
                    "type": "string",
                    "description": "Digits only, without country code (e.g., \"9994076214\")"
                },
                "country_code": {
                    "type": "string",
                    "description": "Country calling code, e.g. \"+1\", \"+91\", \"1\" or \"91\""
                },
                "name": {
                    "type": "string",
                    "description": "User name"
                },
                "latitude": {
                    "type": "number",
                    "description": "Latitude coordinate (-90 to 90)"
                },
                "longitude": {
                    "type": "number",
                    "description": "Longitude coordinate (-180 to 180)"
                }
            },
            "required": ["phone", "country_code", "name", "latitude", "longitude"]
        }),
    };
    let client = api.clone();
    registry.register_async(sign_in_tool, move |args: SignInArgs| {
        let api = client.clone();
        async move { Ok(sign_in(&api, args).await) }
    });

    let verify_tool = McpTool {
        name: "verify_otp".to_string(),
        description: "Verify OTP code for user authentication. Returns the auth token used by protected tools.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "otp_code": {
                    "type": "string",
                    "description": "OTP code digits (6-digit string)"
                },
                "user_id": {
                    "type": "string",
                    "description": "User ID returned from sign_in (must not be a phone number)"
                }
            },
            "required": ["otp_code", "user_id"]
        }),
    };
    let client = api.clone();
    registry.register_async(verify_tool, move |args: VerifyOtpArgs| {
        let api = client.clone();
        async move { Ok(verify_otp(&api, args).await) }
    });

    let resend_tool = McpTool {
        name: "resend_otp".to_string(),
        description: "Resend OTP code to user phone number.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User ID returned from sign_in (must not be a phone number)"
                }
            },
            "required": ["user_id"]
        }),
    };
    registry.register_async(resend_tool, move |args: ResendOtpArgs| {
        let api = api.clone();
        async move { Ok(resend_otp(&api, args).await) }
    });
}

/// Normalize a phone number and country code.
///
/// Formatting characters are removed. `+<code><number>` input overrides the
/// given country code, leading zeros are dropped, and a digits-only country
/// code gets a `+` prefix.
pub fn normalize_phone(phone: &str, country_code: &str) -> Result<(String, String), String> {
    let mut number: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '-') && !c.is_whitespace())
        .collect();
    let mut country_code = country_code.trim().to_string();

    if number.starts_with('+') {
        let captures = INTERNATIONAL_PHONE
            .captures(&number)
            .ok_or_else(|| "Invalid phone format. Expected '+<code><number>'.".to_string())?;
        country_code = captures[1].to_string();
        number = captures[2].to_string();
    } else if number.starts_with('0') {
        number = number.trim_start_matches('0').to_string();
    }

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err("Phone must contain digits only, without country code.".to_string());
    }

    if !country_code.starts_with('+') {
        if !country_code.is_empty() && country_code.chars().all(|c| c.is_ascii_digit()) {
            country_code.insert(0, '+');
        } else {
            return Err(
                "Country code must be digits or start with '+' followed by digits.".to_string(),
            );
        }
    }
    let digits = &country_code[1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("Country code must start with '+' followed by digits.".to_string());
    }

    Ok((number, country_code))
}

pub fn build_sign_in_request(args: &SignInArgs) -> Result<SignInRequest, String> {
    if !(-90.0..=90.0).contains(&args.latitude) {
        return Err("latitude must be between -90 and 90.".to_string());
    }
    if !(-180.0..=180.0).contains(&args.longitude) {
        return Err("longitude must be between -180 and 180.".to_string());
    }
    let (phone, country_code) = normalize_phone(&args.phone, &args.country_code)?;
    Ok(SignInRequest {
        phone,
        country_code,
        name: args.name.clone(),
        location: [args.latitude, args.longitude],
    })
}

/// User ids come from `sign_in`; a phone number in their place is a common
/// agent mistake.
fn validate_user_id(user_id: &str) -> Result<(), String> {
    if user_id.trim().is_empty() {
        return Err("Invalid user_id. Must be a non-empty string.".to_string());
    }
    if user_id.chars().all(|c| c.is_ascii_digit()) || user_id.starts_with('+') {
        return Err(
            "user_id looks like a phone number. Please provide valid user_id from sign_in."
                .to_string(),
        );
    }
    Ok(())
}

pub async fn sign_in(api: &ApiClient, args: SignInArgs) -> Value {
    let request = match build_sign_in_request(&args) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Sign in failed");
            return to_json(&AuthErrorResponse::<SignInRequest>::new(e, None));
        }
    };
    debug!(country_code = %request.country_code, "sign_in payload built");

    let result = match api
        .send(ApiRequest::post("/twilio/sign-in").json(to_json(&request)))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Sign in failed");
            return to_json(&AuthErrorResponse::new(e.to_string(), Some(request)));
        }
    };

    let response = match serde_json::from_value::<SignInResponse>(result.clone()) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Response validation failed but attempting to create response");
            let user = result.get("user").cloned().unwrap_or_else(|| json!({}));
            SignInResponse {
                message: str_of(&result, "message")
                    .unwrap_or("Sign in successful")
                    .to_string(),
                user: SignInUser {
                    id: str_of(&user, "id").unwrap_or("").to_string(),
                    mongo_id: str_of(&user, "_id").map(str::to_string),
                    otp: str_of(&user, "otp").unwrap_or("").to_string(),
                },
                success: bool_of(&result, "success").unwrap_or(true),
            }
        }
    };

    info!(
        country_code = %request.country_code,
        user_id = %response.user.mongo_id.as_deref().unwrap_or(&response.user.id),
        "Sign in successful"
    );
    to_json(&response)
}

pub async fn verify_otp(api: &ApiClient, args: VerifyOtpArgs) -> Value {
    let validated = validate_user_id(&args.user_id).and_then(|_| {
        if !args.otp_code.is_empty() && args.otp_code.chars().all(|c| c.is_ascii_digit()) {
            Ok(())
        } else {
            Err("otp_code must contain only digits.".to_string())
        }
    });
    if let Err(e) = validated {
        error!(error = %e, user_id = %args.user_id, "OTP verification failed");
        return to_json(&AuthErrorResponse::<VerifyOtpRequest>::new(e, None));
    }

    let request = VerifyOtpRequest {
        id: args.user_id.clone(),
        otp: args.otp_code,
    };

    let result = match api
        .send(ApiRequest::post("/twilio/verify-otp").json(to_json(&request)))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, user_id = %args.user_id, "OTP verification failed");
            return to_json(&AuthErrorResponse::new(e.to_string(), Some(request)));
        }
    };

    let response = match serde_json::from_value::<VerifyOtpResponse>(result.clone()) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Response validation failed but attempting to create response");
            let user = result.get("user").cloned().unwrap_or_else(|| json!({}));
            VerifyOtpResponse {
                message: str_of(&result, "message")
                    .unwrap_or("OTP verified successfully")
                    .to_string(),
                user: VerifyOtpUser {
                    name: str_of(&user, "name").unwrap_or("").to_string(),
                    phone: str_of(&user, "phone").unwrap_or("").to_string(),
                    country_code: str_of(&user, "countryCode").unwrap_or("").to_string(),
                    taxi_provider: bool_of(&user, "taxiProvider").unwrap_or(false),
                    certified: bool_of(&user, "certified").unwrap_or(false),
                },
                token: str_of(&result, "token").unwrap_or("").to_string(),
                upload_token: str_of(&result, "uploadToken").unwrap_or("").to_string(),
                success: bool_of(&result, "success").unwrap_or(true),
            }
        }
    };

    info!(
        user_id = %args.user_id,
        user_name = %response.user.name,
        "OTP verification successful"
    );
    to_json(&response)
}

pub async fn resend_otp(api: &ApiClient, args: ResendOtpArgs) -> Value {
    if let Err(e) = validate_user_id(&args.user_id) {
        error!(error = %e, user_id = %args.user_id, "OTP resend failed");
        return to_json(&AuthErrorResponse::<ResendOtpRequest>::new(e, None));
    }

    let request = ResendOtpRequest {
        userid: args.user_id.clone(),
    };

    let result = match api
        .send(ApiRequest::post("/twilio/resend-otp").json(to_json(&request)))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, user_id = %args.user_id, "OTP resend failed");
            return to_json(&AuthErrorResponse::new(e.to_string(), Some(request)));
        }
    };

    let response = serde_json::from_value::<ResendOtpResponse>(result.clone()).unwrap_or_else(|e| {
        warn!(error = %e, "Response validation failed but attempting to create response");
        ResendOtpResponse {
            message: str_of(&result, "message")
                .unwrap_or("OTP sent successfully")
                .to_string(),
            success: bool_of(&result, "success").unwrap_or(true),
        }
    });

    info!(user_id = %args.user_id, message = %response.message, "OTP resent successfully");
    to_json(&response)
}
