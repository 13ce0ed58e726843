#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use whistle_mcp_server::core::config::{ApiSettings, Settings};
use whistle_mcp_server::core::http_client::ApiClient;
use whistle_mcp_server::tools::extractor::{AttributeExtractor, ExtractedWhistle};

/// Client against a mock upstream with a short retry delay.
pub fn api_client(base_url: &str) -> Arc<ApiClient> {
    let mut settings = ApiSettings::with_base_url(base_url);
    settings.retry_delay = Duration::from_millis(10);
    Arc::new(ApiClient::new(&settings).expect("client builds"))
}

pub fn settings(pairs: &[(&str, &str)]) -> Settings {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_lookup(move |key| map.get(key).cloned()).expect("valid settings")
}

/// Extractor returning a fixed result.
pub struct FixedExtractor(pub ExtractedWhistle);

#[async_trait]
impl AttributeExtractor for FixedExtractor {
    async fn extract(&self, user_input: &str) -> ExtractedWhistle {
        ExtractedWhistle {
            description: user_input.to_string(),
            ..self.0.clone()
        }
    }
}

pub fn extracted(tags: &[&str], provider: Option<bool>, confidence: f64) -> ExtractedWhistle {
    ExtractedWhistle {
        description: String::new(),
        alert_radius: 3,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        provider,
        expiry: "never".to_string(),
        ask_again: false,
        reason: String::new(),
        confidence_score: confidence,
    }
}
