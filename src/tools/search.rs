/// Nearby provider search (`search_businesses`).
///
/// Forwards to `POST /searchAround` and normalizes the two result formats the
/// upstream returns into `Provider` records.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::core::error::ToolError;
use crate::core::http_client::{ApiClient, ApiRequest};
use crate::core::server::{McpTool, ToolRegistry};
use crate::models::search::{Provider, SearchLocation, SearchNearMeResponse};
use crate::tools::{num_of, str_of, to_json};

fn default_radius() -> i64 {
    10
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius: i64,
    #[serde(default)]
    pub keyword: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl SearchArgs {
    fn validate(&self) -> Result<(), ToolError> {
        if !(1..=1000).contains(&self.radius) {
            return Err(ToolError::InvalidArguments(
                "radius must be between 1 and 1000".to_string(),
            ));
        }
        if !(1..=1000).contains(&self.limit) {
            return Err(ToolError::InvalidArguments(
                "limit must be between 1 and 1000".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn register(registry: &mut ToolRegistry, api: Arc<ApiClient>) {
    let tool = McpTool {
        name: "search_businesses".to_string(),
        description: "Search for providers near a specific location.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "latitude": {
                    "type": "number",
                    "description": "Latitude of the search location"
                },
                "longitude": {
                    "type": "number",
                    "description": "Longitude of the search location"
                },
                "radius": {
                    "type": "integer",
                    "description": "Search radius in kilometers",
                    "minimum": 1,
                    "maximum": 1000,
                    "default": 10
                },
                "keyword": {
                    "type": "string",
                    "description": "Keyword to search for (e.g., 'mechanic', 'restaurant')",
                    "default": ""
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results to return",
                    "minimum": 1,
                    "maximum": 1000,
                    "default": 10
                }
            },
            "required": ["latitude", "longitude"]
        }),
    };

    registry.register_async(tool, move |args: SearchArgs| {
        let api = api.clone();
        async move {
            args.validate()?;
            let response = search_businesses(&api, args).await;
            Ok(to_json(&response))
        }
    });
}

/// Run the search. Upstream failures are reported inside the response with
/// an empty provider list.
pub async fn search_businesses(api: &ApiClient, args: SearchArgs) -> SearchNearMeResponse {
    let keyword = sanitize_keyword(&args.keyword);
    let search_location = SearchLocation {
        latitude: args.latitude,
        longitude: args.longitude,
    };

    let payload = json!({
        "keyword": keyword,
        "limit": args.limit,
        "location": [args.longitude, args.latitude],
        "provider": true,
        "radius": args.radius,
        "visible": true,
    });

    match api.send(ApiRequest::post("/searchAround").json(payload)).await {
        Ok(result) => {
            let providers = normalize_providers(&result);
            info!(
                query = %keyword,
                results_count = providers.len(),
                "Search completed"
            );
            SearchNearMeResponse {
                total_count: providers.len(),
                providers,
                search_radius: args.radius as f64,
                search_location,
                error: None,
            }
        }
        Err(e) => {
            error!(error = %e, "Search failed");
            SearchNearMeResponse {
                providers: Vec::new(),
                total_count: 0,
                search_radius: args.radius as f64,
                search_location,
                error: Some(format!("Unexpected error: {e}")),
            }
        }
    }
}

/// Only a single keyword is supported; `a|b` searches for `a`.
pub fn sanitize_keyword(keyword: &str) -> String {
    match keyword.split_once('|') {
        Some((first, _)) => {
            warn!("Multiple keywords detected, only the first one will be used.");
            first.trim().to_string()
        }
        None => keyword.to_string(),
    }
}

/// Provider entries from a search response. Objects carry them under
/// `providers`, or `matchingWhistles` when `providers` is empty.
fn extract_providers(result: &Value) -> &[Value] {
    match result {
        Value::Object(map) => {
            let providers = map
                .get("providers")
                .and_then(Value::as_array)
                .filter(|p| !p.is_empty());
            providers
                .or_else(|| map.get("matchingWhistles").and_then(Value::as_array))
                .map(Vec::as_slice)
                .unwrap_or(&[])
        }
        Value::Array(items) => items.as_slice(),
        _ => &[],
    }
}

pub fn normalize_providers(result: &Value) -> Vec<Provider> {
    extract_providers(result)
        .iter()
        .map(|entry| match entry.get("item") {
            Some(item) => normalize_matching_whistle(item),
            None => normalize_direct_provider(entry),
        })
        .collect()
}

fn phone_of(value: &Value) -> String {
    format!(
        "{} {}",
        str_of(value, "countryCode").unwrap_or(""),
        str_of(value, "phone").unwrap_or("")
    )
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `matchingWhistles` entry: the whistle is under `item` and its location is
/// a GeoJSON point (`[longitude, latitude]`).
fn normalize_matching_whistle(item: &Value) -> Provider {
    let location = item.get("location");
    let coordinates = location
        .and_then(|l| l.get("coordinates"))
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty());
    let coordinate = |idx: usize| {
        coordinates
            .and_then(|c| c.get(idx))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    Provider {
        id: str_of(item, "_id").unwrap_or("").to_string(),
        name: str_of(item, "name").unwrap_or("").to_string(),
        phone: phone_of(item),
        address: location
            .and_then(|l| str_of(l, "address"))
            .unwrap_or("")
            .to_string(),
        distance: round_to(num_of(item, "dis").unwrap_or(0.0), 1),
        latitude: coordinate(1),
        longitude: coordinate(0),
        rating: Some(compute_feedback_rating(item)),
    }
}

fn normalize_direct_provider(provider: &Value) -> Provider {
    let id = match provider.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => match provider.get("_id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => String::new(),
        },
    };

    Provider {
        id,
        name: str_of(provider, "name")
            .or_else(|| str_of(provider, "title"))
            .unwrap_or("")
            .to_string(),
        phone: phone_of(provider),
        address: str_of(provider, "address")
            .or_else(|| str_of(provider, "location"))
            .unwrap_or("")
            .to_string(),
        distance: round_to(num_of(provider, "distance").unwrap_or(0.0), 1),
        latitude: num_of(provider, "latitude")
            .or_else(|| num_of(provider, "lat"))
            .unwrap_or(0.0),
        longitude: num_of(provider, "longitude")
            .or_else(|| num_of(provider, "lng"))
            .unwrap_or(0.0),
        rating: Some(compute_feedback_rating(provider)),
    }
}

/// Rating on a 0 to 5 scale from the `likes` and `dislikes` arrays.
/// No feedback at all is a neutral 2.5.
pub fn compute_feedback_rating(item: &Value) -> f64 {
    let count = |key: &str| item.get(key).and_then(Value::as_array).map_or(0, Vec::len);
    let likes = count("likes") as f64;
    let dislikes = count("dislikes") as f64;

    let total = likes + dislikes;
    if total == 0.0 {
        return 2.5;
    }
    let feedback_score = (likes - dislikes) / total;
    round_to((feedback_score + 1.0) * 2.5, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_rating() {
        assert_eq!(compute_feedback_rating(&json!({})), 2.5);
        assert_eq!(compute_feedback_rating(&json!({"likes": [1, 2, 3]})), 5.0);
        assert_eq!(compute_feedback_rating(&json!({"dislikes": [1]})), 0.0);
        assert_eq!(
            compute_feedback_rating(&json!({"likes": [1, 2], "dislikes": [3]})),
            3.33
        );
    }

    #[test]
    fn test_sanitize_keyword() {
        assert_eq!(sanitize_keyword("mechanic"), "mechanic");
        assert_eq!(sanitize_keyword(" plumber | electrician"), "plumber");
        assert_eq!(sanitize_keyword(""), "");
    }

    #[test]
    fn test_normalize_matching_whistles() {
        let result = json!({
            "providers": [],
            "matchingWhistles": [{
                "item": {
                    "_id": "w1",
                    "name": "Ravi Motors",
                    "countryCode": "+91",
                    "phone": "9876543210",
                    "location": {
                        "address": "MG Road",
                        "coordinates": [77.5946, 12.9716]
                    },
                    "dis": 1.26,
                    "likes": ["a"]
                }
            }]
        });
        let providers = normalize_providers(&result);
        assert_eq!(providers.len(), 1);
        let p = &providers[0];
        assert_eq!(p.id, "w1");
        assert_eq!(p.phone, "+91 9876543210");
        assert_eq!(p.address, "MG Road");
        assert_eq!(p.distance, 1.3);
        assert_eq!(p.latitude, 12.9716);
        assert_eq!(p.longitude, 77.5946);
        assert_eq!(p.rating, Some(5.0));
    }

    #[test]
    fn test_normalize_direct_providers() {
        let result = json!([{
            "_id": "p1",
            "title": "Corner Cafe",
            "location": "5th Avenue",
            "distance": 0.44,
            "lat": 40.7,
            "lng": -73.9
        }]);
        let providers = normalize_providers(&result);
        let p = &providers[0];
        assert_eq!(p.id, "p1");
        assert_eq!(p.name, "Corner Cafe");
        assert_eq!(p.phone, " ");
        assert_eq!(p.address, "5th Avenue");
        assert_eq!(p.distance, 0.4);
        assert_eq!(p.latitude, 40.7);
        assert_eq!(p.longitude, -73.9);
        assert_eq!(p.rating, Some(2.5));
    }

    #[test]
    fn test_providers_key_wins_when_not_empty() {
        let result = json!({
            "providers": [{"id": "a", "name": "A"}],
            "matchingWhistles": [{"item": {"_id": "b"}}]
        });
        let providers = normalize_providers(&result);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].id, "a");
        assert!(normalize_providers(&json!("unexpected")).is_empty());
    }

    #[test]
    fn test_argument_ranges() {
        let args: SearchArgs =
            serde_json::from_value(json!({"latitude": 1.0, "longitude": 2.0})).unwrap();
        assert_eq!(args.radius, 10);
        assert_eq!(args.limit, 10);
        assert!(args.validate().is_ok());

        let args: SearchArgs =
            serde_json::from_value(json!({"latitude": 1.0, "longitude": 2.0, "radius": 0}))
                .unwrap();
        assert!(args.validate().is_err());

        let args: SearchArgs =
            serde_json::from_value(json!({"latitude": 1.0, "longitude": 2.0, "limit": 1001}))
                .unwrap();
        assert!(args.validate().is_err());
    }
}
