//! Per-agent token-bucket rate limiter (C5).
//!
//! Capacity `N` requests per window `W` seconds, refilled proportionally
//! to elapsed time on each access (§4.5). Keeps the teacher's
//! `Responder`-based header-injection idiom for the 429 path, algorithm
//! swapped from sliding-window-log to token bucket.

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = env::var("AGORAI_RATE_LIMIT_MAX")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_requests = n;
        }
        if let Ok(val) = env::var("AGORAI_RATE_LIMIT_WINDOW_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.window_secs = n;
        }
        config
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// `allow(agentId)` per §4.5: unseen agents start with `tokens = N - 1`;
    /// seen agents refill `floor(elapsed / W * N)` tokens (capped at `N`)
    /// before spending one.
    pub fn allow(&self, agent_id: &str, config: &RateLimitConfig) -> RateLimitInfo {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let n = config.max_requests as f64;

        let bucket = buckets.entry(agent_id.to_string()).or_insert_with(|| Bucket {
            tokens: n,
            last_refill: now,
        });

        if bucket.tokens == n && bucket.last_refill == now {
            // freshly inserted above; treat as "unseen" path, no extra refill this tick
        } else {
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            let refill = (elapsed / config.window_secs.max(1) as f64) * n;
            if refill > 0.0 {
                bucket.tokens = (bucket.tokens + refill).min(n);
                bucket.last_refill = now;
            }
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitInfo {
                allowed: true,
                limit: config.max_requests,
                remaining: bucket.tokens.floor() as usize,
                retry_after_secs: 0,
            }
        } else {
            RateLimitInfo {
                allowed: false,
                limit: config.max_requests,
                remaining: 0,
                retry_after_secs: config.window_secs,
            }
        }
    }
}

/// 429 responder with `Retry-After` and rate-limit headers (§4.5, §4.8, §7.3).
pub struct RateLimitedError {
    pub info: RateLimitInfo,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "error": "Rate limit exceeded",
            "retry_after_secs": self.info.retry_after_secs,
        }));
        Response::build_from(body.respond_to(req)?)
            .status(rocket::http::Status::TooManyRequests)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", "0"))
            .header(Header::new("Retry-After", self.info.retry_after_secs.to_string()))
            .ok()
    }
}
