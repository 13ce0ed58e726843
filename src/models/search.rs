use serde::{Deserialize, Serialize};

/// A business or person returned by a nearby search, normalized from either
/// upstream result format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    /// Kilometers, one decimal.
    pub distance: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// 0 to 5, derived from likes and dislikes.
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchNearMeResponse {
    pub providers: Vec<Provider>,
    pub total_count: usize,
    pub search_radius: f64,
    pub search_location: SearchLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
