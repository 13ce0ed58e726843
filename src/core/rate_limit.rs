/// Per-caller sliding-window rate limiting for tool calls.
///
/// Each key keeps the timestamps of its calls in the last window. A call is
/// rejected once the number of timestamps reaches the tool's limit. Keys
/// whose window has emptied are swept at most once per window.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::ToolError;

const WINDOW: Duration = Duration::from_secs(60);

/// Requests per minute for tools with a dedicated limit.
const TOOL_LIMITS: &[(&str, usize)] = &[
    ("search_businesses", 30),
    ("sign_in", 5),
    ("verify_otp", 10),
    ("resend_otp", 3),
    ("create_whistle", 20),
    ("toggle_visibility", 10),
    ("get_user_profile", 60),
    ("list_whistles", 60),
];

const PHONE_KEYED_TOOLS: &[&str] = &["sign_in", "verify_otp", "resend_otp"];

pub struct RateLimiter {
    limits: HashMap<&'static str, usize>,
    default_limit: usize,
    window: Duration,
    /// rate key -> call timestamps inside the window, oldest first
    requests: DashMap<String, VecDeque<Instant>>,
    started: Instant,
    /// Milliseconds after `started` of the last sweep.
    last_sweep_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with the built-in per-tool limits.
    ///
    /// # Arguments
    /// * `default_limit` - Calls per minute for tools without a dedicated limit
    pub fn new(default_limit: usize) -> Self {
        Self {
            limits: TOOL_LIMITS.iter().copied().collect(),
            default_limit,
            window: WINDOW,
            requests: DashMap::new(),
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    pub fn limit_for(&self, tool_name: &str) -> usize {
        self.limits
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }

    /// Check the call against its limit and record it when allowed.
    ///
    /// # Arguments
    /// * `tool_name` - Tool being called
    /// * `arguments` - Call arguments, used to derive the rate key
    ///
    /// # Returns
    /// * `Ok(())` - Call allowed and counted
    /// * `Err(ToolError::RateLimited)` - Limit reached for this key
    pub fn check(&self, tool_name: &str, arguments: &Value) -> Result<(), ToolError> {
        self.check_at(tool_name, arguments, Instant::now())
    }

    pub(crate) fn check_at(
        &self,
        tool_name: &str,
        arguments: &Value,
        now: Instant,
    ) -> Result<(), ToolError> {
        let key = rate_key(tool_name, arguments);
        let limit = self.limit_for(tool_name);

        let result = {
            let mut timestamps = self.requests.entry(key.clone()).or_default();
            prune(&mut timestamps, now, self.window);

            if timestamps.len() >= limit {
                Err(ToolError::RateLimited(tool_name.to_string()))
            } else {
                timestamps.push_back(now);
                Ok(())
            }
        };

        // The entry guard is released before sweeping the whole map.
        self.maybe_sweep(now);

        if result.is_err() {
            warn!(
                tool_name,
                rate_key = %truncate_key(&key),
                limit,
                "Rate limit exceeded"
            );
        }
        result
    }

    fn maybe_sweep(&self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.started).as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if elapsed_ms.saturating_sub(last) < self.window.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, elapsed_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.requests.len();
        self.requests.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        debug!(
            removed = before.saturating_sub(self.requests.len()),
            remaining = self.requests.len(),
            "Rate limit keys swept"
        );
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

/// Key a call is counted under.
///
/// Sign-in style tools are keyed by phone number, token-bearing calls by the
/// last 8 characters of the token, everything else by tool name alone.
pub fn rate_key(tool_name: &str, arguments: &Value) -> String {
    let arg = |name: &str| arguments.get(name).and_then(Value::as_str);

    if PHONE_KEYED_TOOLS.contains(&tool_name) {
        let phone = arg("phone").unwrap_or("unknown");
        let country_code = arg("country_code").unwrap_or("");
        return format!("{tool_name}:{country_code}{phone}");
    }

    match arg("access_token").filter(|t| !t.is_empty()) {
        Some(token) => format!("{tool_name}:{}", tail(token, 8)),
        None => format!("{tool_name}:anonymous"),
    }
}

fn tail(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ => s,
    }
}

fn truncate_key(key: &str) -> String {
    if key.chars().count() > 20 {
        format!("{}...", key.chars().take(20).collect::<String>())
    } else {
        key.to_string()
    }
}
