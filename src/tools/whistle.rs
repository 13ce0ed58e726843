/// Whistle tools: `create_whistle` turns a free-text request into a whistle,
/// `list_whistles` reports the caller's existing ones.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::core::error::ToolError;
use crate::core::http_client::{ApiClient, ApiRequest};
use crate::core::server::{McpTool, ToolRegistry};
use crate::models::whistle::{NewWhistle, WhistleSummary};
use crate::tools::extractor::{
    AttributeExtractor, DEFAULT_EXPIRY_DAYS, ExtractedWhistle, expiry_after,
};
use crate::tools::to_json;

pub const MAX_TAGS: usize = 20;
pub const MAX_RADIUS_KM: i64 = 1000;

const CREATE_FAILED: &str =
    "An unexpected error occurred while creating the whistle. Please try again later.";
const LIST_FAILED: &str =
    "An unexpected error occurred while listing the whistles. Please try again later.";

fn default_confidence_threshold() -> f64 {
    0.6
}

#[derive(Debug, Deserialize)]
pub struct CreateWhistleArgs {
    pub user_input: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub force_create: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListWhistlesArgs {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub active_only: bool,
}

pub fn register(
    registry: &mut ToolRegistry,
    api: Arc<ApiClient>,
    extractor: Arc<dyn AttributeExtractor>,
) {
    let create_tool = McpTool {
        name: "create_whistle".to_string(),
        description: "Create a whistle from a natural language description of a service request or offer, e.g. \"I need someone to fix my leaky faucet\" or \"Can teach piano lessons to beginners\". Returns success, clarification_needed or error.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_input": {
                    "type": "string",
                    "description": "Natural language input describing a service request or offer"
                },
                "access_token": {
                    "type": "string",
                    "description": "User access token in the form 'Bearer <token>'",
                    "default": ""
                },
                "confidence_threshold": {
                    "type": "number",
                    "description": "Minimum confidence score to proceed (0.0-1.0)",
                    "minimum": 0.0,
                    "maximum": 1.0,
                    "default": 0.6
                },
                "force_create": {
                    "type": "boolean",
                    "description": "Force creation even with low confidence",
                    "default": false
                }
            },
            "required": ["user_input"]
        }),
    };
    let client = api.clone();
    registry.register_async(create_tool, move |args: CreateWhistleArgs| {
        let api = client.clone();
        let extractor = extractor.clone();
        async move {
            if !(0.0..=1.0).contains(&args.confidence_threshold) {
                return Err(ToolError::InvalidArguments(
                    "confidence_threshold must be between 0.0 and 1.0".to_string(),
                ));
            }
            Ok(create_whistle(&api, extractor.as_ref(), args).await)
        }
    });

    let list_tool = McpTool {
        name: "list_whistles".to_string(),
        description: "Fetch all whistles for the authenticated user.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "access_token": {
                    "type": "string",
                    "description": "User access token in the form 'Bearer <token>'",
                    "default": ""
                },
                "active_only": {
                    "type": "boolean",
                    "description": "If true, only return active whistles",
                    "default": false
                }
            }
        }),
    };
    registry.register_async(list_tool, move |args: ListWhistlesArgs| {
        let api = api.clone();
        async move { Ok(list_whistles(&api, args).await) }
    });
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

const NAIVE_EXPIRY_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_expiry(expiry: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(expiry) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(expiry, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    // Timestamps without an offset are taken as UTC.
    for format in NAIVE_EXPIRY_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(expiry, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(expiry, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Check extracted attributes, correcting what can be corrected in place.
pub fn validate_extraction(data: &mut ExtractedWhistle, now: DateTime<Utc>) -> Validation {
    let mut report = Validation::default();

    if data.description.trim().chars().count() < 5 {
        report.errors.push("Description is too short".to_string());
    }

    if data.alert_radius < 1 {
        data.alert_radius = 2;
        report
            .warnings
            .push("Alert radius set to minimum (2km)".to_string());
    } else if data.alert_radius > MAX_RADIUS_KM {
        data.alert_radius = MAX_RADIUS_KM;
        report
            .warnings
            .push("Alert radius capped at maximum (1000km)".to_string());
    }

    if data.tags.is_empty() {
        if data.confidence_score > 0.5 {
            report
                .errors
                .push("No services could be identified".to_string());
        } else {
            report
                .warnings
                .push("Services unclear - may need clarification".to_string());
        }
    } else if data.tags.len() > MAX_TAGS {
        data.tags.truncate(MAX_TAGS);
        report
            .warnings
            .push("Too many tags - limited to first 20".to_string());
    }

    if data.provider.is_none() && data.confidence_score > 0.6 {
        report
            .errors
            .push("Cannot determine if offering or seeking services".to_string());
    }

    if data.expiry != "never" {
        match parse_expiry(&data.expiry) {
            Some(expiry) if expiry <= now => {
                report.errors.push("Expiry date is in the past".to_string());
            }
            Some(_) => {}
            None => {
                report
                    .warnings
                    .push("Expiry date format unclear - using default".to_string());
                data.expiry = expiry_after(now, DEFAULT_EXPIRY_DAYS);
            }
        }
    }

    report
}

/// Hints for the caller on how to rephrase an unclear request.
pub fn suggestions(data: &ExtractedWhistle, validation: &Validation) -> Vec<String> {
    let mut out = Vec::new();

    if data.confidence_score < 0.3 {
        out.push("Try rephrasing your request with more specific details about what you need or can offer".to_string());
    }
    if data.tags.is_empty() {
        out.push("Please specify the type of service more clearly (e.g., 'home repair', 'tutoring', 'delivery')".to_string());
    }
    if data.provider.is_none() {
        out.push("Clarify whether you're offering a service ('I can...', 'I provide...') or looking for one ('I need...', 'Looking for...')".to_string());
    }
    if data.confidence_score < 0.5 && !data.tags.is_empty() {
        out.push(format!(
            "I detected these services: {}. Is this correct?",
            data.tags.join(", ")
        ));
    }

    for error in &validation.errors {
        let error = error.to_lowercase();
        if error.contains("services") {
            out.push("Try being more specific about the type of help or service involved".to_string());
        } else if error.contains("provider") || error.contains("offering") {
            out.push("Make it clearer whether you're offering help or asking for help".to_string());
        }
    }

    out
}

fn clarification(
    data: &ExtractedWhistle,
    validation: &Validation,
    threshold: f64,
) -> Value {
    let message = if !data.reason.is_empty() {
        data.reason.clone()
    } else if !validation.errors.is_empty() {
        validation.errors.join("; ")
    } else {
        format!(
            "Confidence {:.2} is below the required {:.2}. Add details or set force_create.",
            data.confidence_score, threshold
        )
    };

    json!({
        "status": "clarification_needed",
        "message": message,
        "confidence_score": data.confidence_score,
        "extracted_data": {
            "description": data.description,
            "tags": data.tags,
            "provider": data.provider,
            "alertRadius": data.alert_radius,
            "expiry": data.expiry,
        },
        "warnings": validation.warnings,
        "suggestions": suggestions(data, validation),
    })
}

/// Map an upstream failure to the message shown to the caller.
pub fn creation_error_message(error: &str) -> String {
    if error.contains("ETLIMIT") {
        format!("Too many tags specified (maximum {MAX_TAGS} allowed)")
    } else if error.to_lowercase().contains("referral") {
        error.to_string()
    } else {
        CREATE_FAILED.to_string()
    }
}

pub async fn create_whistle(
    api: &ApiClient,
    extractor: &dyn AttributeExtractor,
    args: CreateWhistleArgs,
) -> Value {
    let mut data = extractor.extract(&args.user_input).await;
    let validation = validate_extraction(&mut data, Utc::now());

    let needs_clarification = data.ask_again
        || !validation.is_valid()
        || (data.confidence_score < args.confidence_threshold && !args.force_create);
    if needs_clarification {
        info!(
            confidence = data.confidence_score,
            errors = ?validation.errors,
            "Whistle needs clarification"
        );
        return clarification(&data, &validation, args.confidence_threshold);
    }

    let whistle = NewWhistle {
        description: data.description.clone(),
        alert_radius: data.alert_radius,
        tags: data.tags.clone(),
        provider: data.provider.unwrap_or(false),
        expiry: data.expiry.clone(),
    };
    info!(whistle = ?whistle, confidence = data.confidence_score, "Creating whistle");

    let request = ApiRequest::post("/whistle")
        .json(json!({ "whistle": to_json(&whistle) }))
        .bearer(&args.access_token);

    let result = match api.send(request).await {
        Ok(result) => result,
        Err(e) => {
            let message = e.to_string();
            error!(error = %message, "Whistle creation failed");
            return json!({
                "status": "error",
                "message": creation_error_message(&message),
            });
        }
    };

    let Some(new_whistle) = result.get("newWhistle").filter(|w| w.is_object()) else {
        return json!({
            "status": "error",
            "message": "Whistle creation failed - no whistle returned",
        });
    };

    let created = WhistleSummary::from_created(new_whistle);
    info!(
        whistle_id = ?created.id,
        provider = created.provider,
        confidence = data.confidence_score,
        "Whistle created successfully"
    );

    let message = format!(
        "Whistle created successfully! {} {}",
        if created.provider { "Offering" } else { "Seeking" },
        created.tags.join(", ")
    );
    json!({
        "status": "success",
        "whistle": to_json(&created),
        "message": message,
        "confidence_score": data.confidence_score,
        "warnings": validation.warnings,
        "matching_whistles": result.get("matchingWhistles").cloned().unwrap_or_else(|| json!([])),
    })
}

pub async fn list_whistles(api: &ApiClient, args: ListWhistlesArgs) -> Value {
    let result = match api
        .send(ApiRequest::get("/user").bearer(&args.access_token))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Whistle listing failed");
            return json!({
                "status": "error",
                "message": LIST_FAILED,
                "whistles": [],
            });
        }
    };

    let whistles: Vec<WhistleSummary> = result
        .pointer("/user/Whistles")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .map(WhistleSummary::from_upstream)
        .filter(|w| !args.active_only || w.active)
        .collect();

    info!(
        total_count = whistles.len(),
        active_only = args.active_only,
        "Whistles listed successfully"
    );
    json!({
        "status": "success",
        "whistles": to_json(&whistles),
    })
}
