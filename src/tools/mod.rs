/// Tools Module
///
/// Each tool module exports a `register` function that adds its tools to the
/// registry during server initialization.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::core::http_client::ApiClient;
use crate::core::server::ToolRegistry;

pub mod auth;
pub mod extractor;
pub mod search;
pub mod user;
pub mod whistle;

use extractor::AttributeExtractor;

/// Register every Whistle tool against the shared upstream client.
///
/// # Arguments
/// * `registry` - Registry that receives the tools
/// * `api` - Client for the Whistle REST API, shared by all tools
/// * `extractor` - Attribute extractor used by `create_whistle`
pub fn register_all(
    registry: &mut ToolRegistry,
    api: Arc<ApiClient>,
    extractor: Arc<dyn AttributeExtractor>,
) {
    search::register(registry, api.clone());
    auth::register(registry, api.clone());
    user::register(registry, api.clone());
    whistle::register(registry, api, extractor);
}

pub(crate) fn str_of<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn num_of(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

pub(crate) fn bool_of(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}
