/// Wire models for the OTP sign-in flow (`/twilio/*` endpoints).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInRequest {
    /// Digits only, without country code.
    pub phone: String,
    #[serde(rename = "countryCode")]
    pub country_code: String,
    pub name: String,
    /// `[latitude, longitude]`.
    pub location: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInUser {
    pub id: String,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    pub otp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInResponse {
    pub message: String,
    pub user: SignInUser,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub id: String,
    pub otp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOtpUser {
    pub name: String,
    pub phone: String,
    #[serde(rename = "countryCode")]
    pub country_code: String,
    #[serde(rename = "taxiProvider")]
    pub taxi_provider: bool,
    pub certified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub message: String,
    pub user: VerifyOtpUser,
    pub token: String,
    #[serde(rename = "uploadToken")]
    pub upload_token: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResendOtpRequest {
    pub userid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResendOtpResponse {
    pub message: String,
    pub success: bool,
}

/// Failure result of an auth tool. `payload` is the request that was sent,
/// or `None` when validation failed before it could be built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthErrorResponse<P: Serialize> {
    pub success: bool,
    pub error: String,
    pub payload: Option<P>,
}

impl<P: Serialize> AuthErrorResponse<P> {
    pub fn new(error: impl Into<String>, payload: Option<P>) -> Self {
        Self {
            success: false,
            error: error.into(),
            payload,
        }
    }
}
