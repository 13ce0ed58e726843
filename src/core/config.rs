/// Server configuration.
///
/// All settings come from environment variables (optionally seeded from a
/// `.env` file by the binary). See `Settings::from_lookup` for the full list
/// and defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::core::error::ConfigError;
use crate::core::utils::{get_opt, get_or, get_parsed, split_list};

pub const DEFAULT_API_BASE_URL: &str = "https://dowhistle.herokuapp.com/v3";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Deployment environment. Controls log format, default log level and CORS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}', expected development, staging or production"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transports to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http,
    Both,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            "both" => Ok(TransportMode::Both),
            other => Err(format!(
                "invalid transport mode '{other}', must be 'stdio', 'http' or 'both'"
            )),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Http => "http",
            TransportMode::Both => "both",
        })
    }
}

/// Upstream REST API client settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    /// Base URL used instead of `base_url` for `searchAround` endpoints.
    pub search_base_url: Option<String>,
    pub api_key: Option<String>,
    /// Total attempts per request, including the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ApiSettings {
    /// Settings pointing at `base_url` with the default retry policy.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            search_base_url: None,
            api_key: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub origins: String,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub transport: TransportMode,
    pub server_name: String,
    pub server_version: String,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub log_level: String,
    pub rate_limit_per_minute: usize,
    pub api: ApiSettings,
    pub openai: OpenAiSettings,
    pub cors: CorsSettings,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a variable name, if set
    ///
    /// # Returns
    /// * `Ok(Settings)` - Every value parsed, with defaults for unset keys
    /// * `Err(ConfigError)` - A value failed to parse or validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment =
            get_parsed(&lookup, "ENVIRONMENT", Environment::Development)?;
        let transport: TransportMode = get_parsed(&lookup, "TRANSPORT_MODE", TransportMode::Http)?;

        // Capped to avoid excessive context switching on large hosts.
        let default_workers = num_cpus::get().clamp(1, 16);
        let workers: usize = get_parsed(&lookup, "WORKER_THREADS", default_workers)?;

        let base_url = validate_url(
            "EXPRESS_API_BASE_URL",
            get_or(&lookup, "EXPRESS_API_BASE_URL", DEFAULT_API_BASE_URL),
        )?;
        let search_base_url = get_opt(&lookup, "SEARCH_API_BASE_URL")
            .map(|u| validate_url("SEARCH_API_BASE_URL", u))
            .transpose()?;

        let retry_delay_secs: f64 = get_parsed(&lookup, "RETRY_DELAY", 1.0)?;
        if !retry_delay_secs.is_finite() || retry_delay_secs < 0.0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_DELAY",
                value: retry_delay_secs.to_string(),
                reason: "must be a non-negative number of seconds".to_string(),
            });
        }
        let max_retries: u32 = get_parsed(&lookup, "MAX_RETRIES", 3)?;

        let api = ApiSettings {
            base_url,
            search_base_url,
            api_key: get_opt(&lookup, "API_KEY"),
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs_f64(retry_delay_secs),
            connect_timeout: Duration::from_secs(get_parsed(&lookup, "CONNECTION_TIMEOUT", 30)?),
            request_timeout: Duration::from_secs(get_parsed(&lookup, "REQUEST_TIMEOUT", 30)?),
        };

        let openai = OpenAiSettings {
            api_key: get_opt(&lookup, "OPENAI_API_KEY"),
            base_url: validate_url(
                "OPENAI_BASE_URL",
                get_or(&lookup, "OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            )?,
            model: get_or(&lookup, "OPENAI_MODEL", "gpt-3.5-turbo"),
        };

        let cors = CorsSettings {
            origins: get_or(&lookup, "CORS_ORIGINS", "*"),
            methods: split_list(&get_or(&lookup, "CORS_METHODS", "GET,POST,OPTIONS")),
            headers: split_list(&get_or(
                &lookup,
                "CORS_HEADERS",
                "Content-Type,Authorization",
            )),
        };

        Ok(Self {
            environment,
            transport,
            server_name: get_or(&lookup, "SERVER_NAME", "whistle-mcp-server"),
            server_version: get_or(&lookup, "SERVER_VERSION", env!("CARGO_PKG_VERSION")),
            host: get_or(&lookup, "HOST", "0.0.0.0"),
            port: get_parsed(&lookup, "PORT", 3000)?,
            workers: workers.max(1),
            log_level: resolve_log_level(get_opt(&lookup, "LOG_LEVEL"), environment),
            rate_limit_per_minute: get_parsed(&lookup, "RATE_LIMIT_PER_MINUTE", 100)?,
            api,
            openai,
            cors,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log the effective configuration once at startup.
    pub fn log_summary(&self) {
        tracing::info!(
            environment = %self.environment,
            transport = %self.transport,
            port = self.port,
            api_base_url = %self.api.base_url,
            log_level = %self.log_level,
            max_retries = self.api.max_retries,
            retry_delay_ms = self.api.retry_delay.as_millis() as u64,
            "server configuration"
        );
    }
}

/// An explicit non-INFO level wins. Otherwise production logs at INFO and
/// everything else at DEBUG.
fn resolve_log_level(explicit: Option<String>, environment: Environment) -> String {
    match explicit {
        Some(level) if !level.eq_ignore_ascii_case("INFO") => level.to_ascii_uppercase(),
        _ => match environment {
            Environment::Production => "INFO".to_string(),
            Environment::Staging | Environment::Development => "DEBUG".to_string(),
        },
    }
}

fn validate_url(key: &'static str, raw: String) -> Result<String, ConfigError> {
    let parsed = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.environment, Environment::Development);
        assert_eq!(s.transport, TransportMode::Http);
        assert_eq!(s.port, 3000);
        assert_eq!(s.api.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(s.api.max_retries, 3);
        assert_eq!(s.api.retry_delay, Duration::from_secs(1));
        assert_eq!(s.api.request_timeout, Duration::from_secs(30));
        assert_eq!(s.rate_limit_per_minute, 100);
        assert_eq!(s.log_level, "DEBUG");
        assert_eq!(s.cors.methods, vec!["GET", "POST", "OPTIONS"]);
        assert!(s.api.api_key.is_none());
        assert!(s.openai.api_key.is_none());
    }

    #[test]
    fn test_log_level_follows_environment() {
        let prod = settings(&[("ENVIRONMENT", "production")]).unwrap();
        assert_eq!(prod.log_level, "INFO");

        let staging = settings(&[("ENVIRONMENT", "staging"), ("LOG_LEVEL", "INFO")]).unwrap();
        assert_eq!(staging.log_level, "DEBUG");

        let explicit = settings(&[("ENVIRONMENT", "production"), ("LOG_LEVEL", "warn")]).unwrap();
        assert_eq!(explicit.log_level, "WARN");
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("EXPRESS_API_BASE_URL", "http://localhost:4000/v3/"),
            ("MAX_RETRIES", "0"),
            ("RETRY_DELAY", "0.25"),
            ("PORT", "8080"),
            ("TRANSPORT_MODE", "BOTH"),
            ("API_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(s.api.base_url, "http://localhost:4000/v3");
        // At least one attempt is always made.
        assert_eq!(s.api.max_retries, 1);
        assert_eq!(s.api.retry_delay, Duration::from_millis(250));
        assert_eq!(s.bind_addr(), "0.0.0.0:8080");
        assert_eq!(s.transport, TransportMode::Both);
        assert_eq!(s.api.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(settings(&[("ENVIRONMENT", "qa")]).is_err());
        assert!(settings(&[("TRANSPORT_MODE", "grpc")]).is_err());
        assert!(settings(&[("PORT", "99999")]).is_err());
        assert!(settings(&[("EXPRESS_API_BASE_URL", "not a url")]).is_err());
        assert!(settings(&[("EXPRESS_API_BASE_URL", "ftp://example.com")]).is_err());
        assert!(settings(&[("RETRY_DELAY", "-1")]).is_err());
    }
}
