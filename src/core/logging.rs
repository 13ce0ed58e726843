/// Logging setup and log-safe views of tool arguments.

use serde_json::{Map, Value};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::config::Settings;

/// Install the global tracing subscriber.
///
/// Output goes to stderr so the STDIO transport keeps stdout for JSON-RPC.
/// Production uses JSON lines, other environments a compact format.
/// `RUST_LOG` overrides the level derived from the settings.
pub fn init_logging(settings: &Settings) {
    let level = settings.log_level.to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("whistle_mcp_server={level},actix_web=info,warn")));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A subscriber may already be installed (tests, embedding); keep it.
    let result = if settings.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

/// Copy of the arguments with credentials and personal data masked.
///
/// `access_token` keeps its last 4 characters, `phone` its first and last 2,
/// `otp_code` is fully masked.
pub fn sanitize_arguments(arguments: &Value) -> Value {
    let Some(map) = arguments.as_object() else {
        return arguments.clone();
    };

    let masked: Map<String, Value> = map
        .iter()
        .map(|(key, value)| {
            let value = match (key.as_str(), value.as_str()) {
                ("access_token", Some(token)) => Value::String(mask_token(token)),
                ("phone", Some(phone)) => Value::String(mask_phone(phone)),
                ("otp_code", _) => Value::String("***".to_string()),
                _ => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(masked)
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 4 {
        format!("***{}", chars[chars.len() - 4..].iter().collect::<String>())
    } else {
        "***".to_string()
    }
}

fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() > 4 {
        format!(
            "{}***{}",
            chars[..2].iter().collect::<String>(),
            chars[chars.len() - 2..].iter().collect::<String>()
        )
    } else {
        "***".to_string()
    }
}

/// Argument names, for log lines that should not carry values.
pub fn argument_keys(arguments: &Value) -> Vec<String> {
    arguments
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

pub fn has_auth_token(arguments: &Value) -> bool {
    arguments
        .get("access_token")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_masks_sensitive_fields() {
        let args = json!({
            "access_token": "Bearer abcdef1234",
            "phone": "9994076214",
            "otp_code": "123456",
            "name": "Asha"
        });
        let safe = sanitize_arguments(&args);
        assert_eq!(safe["access_token"], "***1234");
        assert_eq!(safe["phone"], "99***14");
        assert_eq!(safe["otp_code"], "***");
        assert_eq!(safe["name"], "Asha");
    }

    #[test]
    fn test_short_values_fully_masked() {
        let safe = sanitize_arguments(&json!({"access_token": "abc", "phone": "123"}));
        assert_eq!(safe["access_token"], "***");
        assert_eq!(safe["phone"], "***");
    }

    #[test]
    fn test_argument_helpers() {
        let args = json!({"access_token": "", "visible": "true"});
        assert!(!has_auth_token(&args));
        let mut keys = argument_keys(&args);
        keys.sort();
        assert_eq!(keys, vec!["access_token", "visible"]);
        assert!(argument_keys(&json!(null)).is_empty());
    }
}
