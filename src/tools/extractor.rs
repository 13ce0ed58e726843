/// Natural-language attribute extraction for `create_whistle`.
///
/// A free-text request ("need a plumber tomorrow") is turned into whistle
/// attributes by a chat completion model in up to three passes: primary
/// extraction, validation with a confidence score and, when that score is
/// low, an enhancement pass that fills gaps with reasonable assumptions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::core::config::OpenAiSettings;
use crate::core::error::{ApiError, ExtractionError};

pub const DEFAULT_RADIUS_KM: i64 = 2;
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 1000;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);
const ENHANCE_BELOW_CONFIDENCE: f64 = 0.7;

const NOT_CONFIGURED_REASON: &str =
    "OpenAI API key not configured. Please set OPENAI_API_KEY environment variable.";
const UNCLEAR_REASON: &str = "Could not clearly understand the service request";

/// Whistle attributes read from a free-text request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedWhistle {
    pub description: String,
    pub alert_radius: i64,
    pub tags: Vec<String>,
    /// `Some(true)` when offering a service, `Some(false)` when seeking one.
    pub provider: Option<bool>,
    /// RFC 3339 timestamp or `never`.
    pub expiry: String,
    /// The request was too unclear to act on; `reason` says why.
    pub ask_again: bool,
    pub reason: String,
    pub confidence_score: f64,
}

impl ExtractedWhistle {
    pub fn ask_again(description: &str, reason: impl Into<String>) -> Self {
        Self {
            description: description.to_string(),
            alert_radius: DEFAULT_RADIUS_KM,
            tags: Vec::new(),
            provider: None,
            expiry: "never".to_string(),
            ask_again: true,
            reason: reason.into(),
            confidence_score: 0.0,
        }
    }
}

#[async_trait]
pub trait AttributeExtractor: Send + Sync {
    /// Never fails; problems are reported as an `ask_again` result.
    async fn extract(&self, user_input: &str) -> ExtractedWhistle;
}

/// Expiry `days` from `now`, formatted like the upstream expects.
pub fn expiry_after(now: DateTime<Utc>, days: i64) -> String {
    (now + chrono::Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Pull the JSON document out of a model reply that may be wrapped in a
/// Markdown code fence.
pub fn strip_code_fence(content: &str) -> &str {
    let inner = if let Some((_, rest)) = content.split_once("```json") {
        rest
    } else if let Some((_, rest)) = content.split_once("```") {
        rest
    } else {
        return content.trim();
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

fn first_tags(result: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| result.get(*k).and_then(Value::as_array))
        .find(|items| !items.is_empty())
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn first_number(result: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| result.get(*k).and_then(Value::as_f64))
        .find(|n| *n != 0.0)
}

fn first_text<'a>(result: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| result.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn flag(result: &Value, key: &str) -> Option<bool> {
    result.get(key).and_then(Value::as_bool)
}

/// Assemble the extraction from a primary, validation or enhancement reply.
///
/// Each attribute takes the first usable value across the keys the three
/// passes use, most refined first.
pub fn build_extraction(user_input: &str, result: &Value, now: DateTime<Utc>) -> ExtractedWhistle {
    let tags = first_tags(
        result,
        &["final_services", "enhanced_services", "services_identified"],
    );

    // Presence decides, so an explicit null means "unknown".
    let provider = ["final_provider", "enhanced_provider", "provider"]
        .iter()
        .find_map(|k| result.get(*k))
        .and_then(Value::as_bool);

    let alert_radius = first_number(
        result,
        &["final_radius", "enhanced_radius", "alert_radius_km"],
    )
    .map(|r| r as i64)
    .unwrap_or(DEFAULT_RADIUS_KM);

    let expiry = match first_text(result, &["final_expiry", "enhanced_expiry", "expiry_iso"]) {
        None | Some("default") => expiry_after(now, DEFAULT_EXPIRY_DAYS),
        Some(expiry) => expiry.to_string(),
    };

    let ask_again = flag(result, "clarification_needed") == Some(true)
        || flag(result, "needs_clarification") == Some(true)
        || flag(result, "actionable") == Some(false)
        || flag(result, "actionable_with_assumptions") == Some(false);

    let reason = if ask_again {
        first_text(result, &["clarification_question", "clarification_reason"])
            .unwrap_or(UNCLEAR_REASON)
            .to_string()
    } else {
        String::new()
    };

    ExtractedWhistle {
        description: user_input.to_string(),
        alert_radius,
        tags,
        provider,
        expiry,
        ask_again,
        reason,
        confidence_score: first_number(result, &["confidence", "clarity_score"]).unwrap_or(0.5),
    }
}

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiExtractor {
    client: Client,
    base_url: String,
    model: String,
    configured: bool,
}

impl OpenAiExtractor {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let configured = match settings.api_key.as_deref() {
            Some(key) => match HeaderValue::from_str(&format!("Bearer {key}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                    true
                }
                Err(e) => {
                    error!(error = %e, "OPENAI_API_KEY is not a valid header value, extraction disabled");
                    false
                }
            },
            None => false,
        };

        let client = Client::builder()
            .default_headers(headers)
            .timeout(COMPLETION_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            configured,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Value, ExtractionError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(ApiError::Transport)?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let completion: Value = serde_json::from_str(&text).map_err(ApiError::Decode)?;
        let content = completion
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(ExtractionError::EmptyResponse)?;

        serde_json::from_str(strip_code_fence(content)).map_err(|e| {
            error!(content = %content, "Failed to parse OpenAI JSON response");
            ExtractionError::InvalidJson(e)
        })
    }

    async fn primary(&self, user_input: &str, now: DateTime<Utc>) -> Result<Value, ExtractionError> {
        let user_prompt = format!(
            r#"Analyze this text and extract service information: "{user_input}"

Current date and time: {now}

Think through this step by step:
1. What services/skills/help are being discussed?
2. Is this person offering to provide something or asking for something?
3. Any location/distance mentioned?
4. Any time constraints mentioned?
5. Is this clear enough to create a service request?

Respond with valid JSON in this exact format:
{{
    "reasoning": "your step-by-step analysis",
    "services_identified": ["list", "of", "services", "found"],
    "provider": true/false/null,
    "provider_reasoning": "why you determined this",
    "alert_radius_km": number,
    "distance_reasoning": "how you determined radius",
    "expiry_iso": "ISO datetime string or 'default'",
    "time_reasoning": "how you determined timing",
    "clarity_score": 0.0-1.0,
    "clarity_reasoning": "why this score",
    "needs_clarification": true/false,
    "clarification_reason": "what needs clarification"
}}"#,
            now = now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        self.complete(PRIMARY_SYSTEM_PROMPT, &user_prompt).await
    }

    async fn validate(&self, user_input: &str, primary: &Value) -> Result<Value, ExtractionError> {
        let user_prompt = format!(
            r#"Original input: "{user_input}"

Extracted data: {extracted}

Validate this extraction:
1. Do the identified services make sense for the input?
2. Is the provider determination logical?
3. Are the time/location inferences reasonable?
4. Is this actionable as a service request/offer?

Respond with valid JSON:
{{
    "validation_passed": true/false,
    "confidence": 0.0-1.0,
    "issues_found": ["list", "of", "any", "issues"],
    "suggested_improvements": ["list", "of", "suggestions"],
    "final_services": ["refined", "service", "list"],
    "final_provider": true/false/null,
    "final_radius": number,
    "final_expiry": "ISO datetime or 'default'",
    "actionable": true/false
}}"#,
            extracted = pretty(primary),
        );
        self.complete(VALIDATE_SYSTEM_PROMPT, &user_prompt).await
    }

    async fn enhance(&self, user_input: &str, primary: &Value) -> Result<Value, ExtractionError> {
        let user_prompt = format!(
            r#"Original input: "{user_input}"
Primary extraction: {extracted}

This extraction had low confidence. Please enhance it by:
1. Making reasonable assumptions about unclear services
2. Using context clues to determine provider/seeker status
3. Inferring appropriate defaults for missing information
4. Deciding if it's actionable with reasonable assumptions

Respond with valid JSON:
{{
    "enhanced_services": ["best", "guess", "services"],
    "enhanced_provider": true/false/null,
    "enhanced_radius": number,
    "enhanced_expiry": "ISO datetime or 'default'",
    "assumptions_made": ["list", "of", "assumptions"],
    "confidence": 0.0-1.0,
    "actionable_with_assumptions": true/false,
    "clarification_needed": true/false,
    "clarification_question": "specific question to ask user"
}}"#,
            extracted = pretty(primary),
        );
        self.complete(ENHANCE_SYSTEM_PROMPT, &user_prompt).await
    }

    async fn run_passes(&self, user_input: &str) -> Result<ExtractedWhistle, ExtractionError> {
        let now = Utc::now();
        let primary = self.primary(user_input, now).await?;
        let validation = self.validate(user_input, &primary).await?;

        let confidence = validation
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        debug!(confidence, "Extraction validated");

        if confidence < ENHANCE_BELOW_CONFIDENCE {
            let enhanced = self.enhance(user_input, &primary).await?;
            return Ok(build_extraction(user_input, &enhanced, now));
        }
        Ok(build_extraction(user_input, &validation, now))
    }
}

#[async_trait]
impl AttributeExtractor for OpenAiExtractor {
    async fn extract(&self, user_input: &str) -> ExtractedWhistle {
        if !self.configured {
            return ExtractedWhistle::ask_again(user_input, NOT_CONFIGURED_REASON);
        }
        match self.run_passes(user_input).await {
            Ok(extracted) => {
                info!(
                    tags = ?extracted.tags,
                    provider = ?extracted.provider,
                    confidence = extracted.confidence_score,
                    "Attributes extracted"
                );
                extracted
            }
            Err(e) => {
                error!(error = %e, "OpenAI extraction failed");
                ExtractedWhistle::ask_again(user_input, format!("Unable to process request: {e}"))
            }
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

const PRIMARY_SYSTEM_PROMPT: &str = "You are an expert at understanding service requests and offers. Your job is to analyze text and extract structured information about services.

You must analyze the input and extract these attributes with reasoning:

1. SERVICE TAGS: What specific services, skills, or help are mentioned? Think broadly - any profession, skill, task, or assistance type
2. PROVIDER STATUS: Is the person offering services (provider=true) or seeking services (provider=false)?
3. LOCATION SCOPE: Any distance or area mentioned? Convert to kilometers if needed
4. TIME FRAME: Any time references? Convert to future datetime
5. CLARITY: Is the request clear enough to act on?

Be creative and comprehensive in identifying services. Consider:
- Professional services (plumber, teacher, developer, etc.)
- Skills (coding, cooking, tutoring, etc.)
- Tasks (cleaning, delivery, repair, etc.)
- General help categories (moving, babysitting, etc.)
- Creative services (writing, design, photography, etc.)

Always think step-by-step and explain your reasoning.";

const VALIDATE_SYSTEM_PROMPT: &str = "You are a validator for service request extractions. Your job is to check if the extracted information makes sense and is actionable.

Evaluate the extraction quality and provide confidence scoring.";

const ENHANCE_SYSTEM_PROMPT: &str = "You are an enhancement specialist for unclear service requests. Your job is to make the best possible interpretation of ambiguous inputs.

Use contextual reasoning to fill gaps and make reasonable assumptions.";
