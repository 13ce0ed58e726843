use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /whistle` (wrapped as `{"whistle": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWhistle {
    pub description: String,
    pub alert_radius: i64,
    pub tags: Vec<String>,
    pub provider: bool,
    pub expiry: String,
}

/// A whistle as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhistleSummary {
    pub id: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
    pub alert_radius: i64,
    pub expiry: String,
    pub provider: bool,
    pub active: bool,
}

impl WhistleSummary {
    /// Build from a whistle in a user's `Whistles` list, filling upstream
    /// defaults for missing fields. `id` falls back to `_id`.
    pub fn from_upstream(whistle: &Value) -> Self {
        Self::with_id_keys(whistle, &["id", "_id"])
    }

    /// Build from the `newWhistle` of a create response, where `_id` is the
    /// stored id and wins over `id`.
    pub fn from_created(whistle: &Value) -> Self {
        Self::with_id_keys(whistle, &["_id", "id"])
    }

    fn with_id_keys(whistle: &Value, id_keys: &[&str]) -> Self {
        let id = id_keys
            .iter()
            .find_map(|k| whistle.get(*k).and_then(Value::as_str))
            .map(str::to_string);
        Self {
            id,
            description: whistle
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            tags: whistle
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            alert_radius: whistle
                .get("alertRadius")
                .and_then(Value::as_f64)
                .map(|r| r as i64)
                .unwrap_or(2),
            expiry: whistle
                .get("expiry")
                .and_then(Value::as_str)
                .unwrap_or("never")
                .to_string(),
            provider: whistle
                .get("provider")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            active: whistle.get("active").and_then(Value::as_bool).unwrap_or(true),
        }
    }
}
