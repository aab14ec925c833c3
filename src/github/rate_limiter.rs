use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Tracks the primary rate-limit budget GitHub reports on every response.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimitState>>,
}

struct RateLimitState {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimitState {
                remaining: None,
                reset_at: None,
            })),
        }
    }

    /// How long to hold off before the next request, if the budget is spent.
    pub async fn pending_delay(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        if state.remaining != Some(0) {
            return None;
        }
        let reset_at = state.reset_at?;
        let now = Instant::now();
        (reset_at > now).then(|| reset_at - now)
    }

    pub async fn remaining(&self) -> Option<u32> {
        self.state.lock().await.remaining
    }

    pub async fn update_from_headers(&self, headers: &HeaderMap) {
        let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") else {
            return;
        };

        let mut state = self.state.lock().await;
        state.remaining = Some(remaining.min(u32::MAX as u64) as u32);
        state.reset_at = reset_delay(headers).map(|wait| Instant::now() + wait);

        if remaining < 100 {
            tracing::debug!("GitHub rate limit low: {} requests remaining", remaining);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Time until `x-ratelimit-reset`, plus a second of slack.
fn reset_delay(headers: &HeaderMap) -> Option<Duration> {
    let reset_timestamp = header_u64(headers, "x-ratelimit-reset")?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset_timestamp.saturating_sub(now) + 1))
}

/// Server-suggested wait in whole seconds: `retry-after` first, then the
/// primary limit reset when the budget is exhausted.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(secs);
    }
    if header_u64(headers, "x-ratelimit-remaining") == Some(0) {
        return reset_delay(headers).map(|d| d.as_secs());
    }
    None
}

/// Whether a failed response is GitHub asking us to slow down rather than
/// refusing access. Secondary limits arrive as 403 with `retry-after`.
pub fn is_rate_limit_response(status: StatusCode, headers: &HeaderMap, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status != StatusCode::FORBIDDEN {
        return false;
    }
    header_u64(headers, "x-ratelimit-remaining") == Some(0)
        || headers.contains_key("retry-after")
        || body.to_lowercase().contains("rate limit")
}
