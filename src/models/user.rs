/// User profile as returned by `GET /user` and `PUT /user`.
///
/// Unknown upstream fields are ignored; missing flags fall back to the
/// upstream defaults.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_usertype() -> Option<String> {
    Some("individual".to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reachability {
    #[serde(default)]
    pub call: bool,
    #[serde(rename = "SMS", default)]
    pub sms: bool,
    #[serde(default)]
    pub email: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quarantine {
    #[serde(default)]
    pub home_location: Option<Vec<f64>>,
    #[serde(default)]
    pub active_alert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Read from `_id`; a plain `id` sent alongside it is ignored.
    #[serde(rename(deserialize = "_id", serialize = "id"))]
    pub id: String,
    pub name: String,
    pub phone: String,
    pub country_code: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub certified: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub taxi_provider: bool,
    #[serde(default = "default_usertype")]
    pub usertype: Option<String>,
    #[serde(default)]
    pub quarantine_admin: bool,
    #[serde(default)]
    pub migrated: bool,
    #[serde(default)]
    pub safety_alerts_enabled: bool,
    #[serde(default)]
    pub reachability: Option<Reachability>,
    #[serde(default)]
    pub quarantine: Option<Quarantine>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileResponse {
    pub success: bool,
    pub data: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UserProfileResponse {
    pub fn found(profile: UserProfile) -> Self {
        Self {
            success: true,
            data: Some(profile),
            message: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            success: false,
            data: None,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_from_upstream_user() {
        let profile: UserProfile = serde_json::from_value(json!({
            "_id": "64f0c0ffee",
            "name": "Asha",
            "phone": "9994076214",
            "countryCode": "+91",
            "visible": false,
            "reachability": {"call": true, "SMS": true},
            "Whistles": [],
            "createdAt": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(profile.id, "64f0c0ffee");
        assert!(!profile.visible);
        assert!(profile.active);
        assert_eq!(profile.usertype.as_deref(), Some("individual"));
        let reach = profile.reachability.unwrap();
        assert!(reach.call && reach.sms && !reach.email);
        assert_eq!(profile.created_at.as_deref(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_profile_with_both_id_keys() {
        let profile: UserProfile = serde_json::from_value(json!({
            "_id": "64f0c0ffee",
            "id": "64f0c0ffee",
            "name": "Asha",
            "phone": "9994076214",
            "countryCode": "+91"
        }))
        .unwrap();
        assert_eq!(profile.id, "64f0c0ffee");

        let v = serde_json::to_value(&profile).unwrap();
        assert_eq!(v["id"], "64f0c0ffee");
        assert!(v.get("_id").is_none());
        assert_eq!(v["quarantineAdmin"], false);
        assert_eq!(v["migrated"], false);
        assert_eq!(v["safetyAlertsEnabled"], false);
    }

    #[test]
    fn test_profile_requires_identity_fields() {
        assert!(serde_json::from_value::<UserProfile>(json!({"_id": "x"})).is_err());
    }

    #[test]
    fn test_failed_response_shape() {
        let v = serde_json::to_value(UserProfileResponse::failed("boom")).unwrap();
        assert_eq!(v, json!({"success": false, "data": null, "message": "boom"}));
        let v = serde_json::to_value(UserProfileResponse::missing()).unwrap();
        assert_eq!(v, json!({"success": false, "data": null}));
    }
}
