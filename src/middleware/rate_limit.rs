use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::middleware::auth::Claims;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed one-second window per caller. Callers are keyed by token subject
/// when auth ran first, otherwise they share one bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    rps: u32,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            return true;
        };
        windows.retain(|_, w| now.duration_since(w.start) < WINDOW * 60);

        let window = windows.entry(key.to_string()).or_insert(Window { start: now, count: 0 });
        if now.duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 0;
        }
        if window.count < self.rps {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

pub async fn rps_middleware(State(limiter): State<RateLimiter>, req: Request<Body>, next: Next) -> Response {
    let key = req
        .extensions()
        .get::<Claims>()
        .map(|c| c.sub.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    if !limiter.allow_at(&key, Instant::now()) {
        tracing::debug!(%key, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limit_exceeded" })),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_caller_has_its_own_budget() {
        let limiter = RateLimiter::new(2);
        let t = Instant::now();
        assert!(limiter.allow_at("a", t));
        assert!(limiter.allow_at("a", t));
        assert!(!limiter.allow_at("a", t));
        assert!(limiter.allow_at("b", t));
        assert!(limiter.allow_at("a", t + WINDOW));
    }
}
