//! Fixed-window request budget keyed per client.
//!
//! The stdio transport never consults the limiter: it serves exactly one
//! trusted local client, so [`STDIO_RATE_KEY`] exists only so logs name it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::AuthMode;
use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::types::RateLimitKey;

/// Budget key used for the stdio transport. Exempt from limiting.
pub const STDIO_RATE_KEY: &str = "stdio";

/// Outcome of [`RateLimiter::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Exceeded { retry_after_secs: u64 },
}

impl RateLimitDecision {
    pub fn into_result(self) -> Result<u32, GatewayError> {
        match self {
            Self::Allowed { remaining } => Ok(remaining),
            Self::Exceeded { retry_after_secs } => Err(GatewayError::RateLimit { retry_after_secs }),
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<RateLimitKey, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            max_requests: config.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Build the key for a network client.
    pub fn key_for(mode: AuthMode, client_addr: &str) -> RateLimitKey {
        RateLimitKey::new(format!("{}-{}", mode, client_addr))
    }

    /// Consume one unit of `key`'s budget.
    pub async fn consume(&self, key: &RateLimitKey) -> RateLimitDecision {
        self.consume_at(key, Instant::now()).await
    }

    async fn consume_at(&self, key: &RateLimitKey, now: Instant) -> RateLimitDecision {
        let mut windows = self.windows.lock().await;
        let window_len = self.window;
        windows.retain(|_, w| now.saturating_duration_since(w.started) < window_len);

        let window = windows.entry(key.clone()).or_insert(Window {
            started: now,
            count: 0,
        });

        if window.count >= self.max_requests {
            let left = window_len.saturating_sub(now.saturating_duration_since(window.started));
            let retry_after_secs = left.as_millis().div_ceil(1000).max(1) as u64;
            debug!(rate_key = %key, retry_after_secs, "Rate limit exceeded");
            return RateLimitDecision::Exceeded { retry_after_secs };
        }

        window.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Number of live windows, for diagnostics.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
