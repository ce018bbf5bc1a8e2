// Rate limiting middleware for wallet operations
//
// In-memory sliding window, per process. Best-effort by design: a multi
// instance deployment must back this with the shared Redis store instead.
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<String, Vec<std::time::Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        let mut requests = self.requests.lock().unwrap();
        let now = std::time::Instant::now();

        let entry = requests.entry(key.to_string()).or_insert_with(Vec::new);

        // Drop requests that fell out of the window
        entry.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if entry.len() < self.max_requests {
            entry.push(now);
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client_id = get_client_id(&request);

    if !limiter.is_allowed(&client_id) {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

fn get_client_id(request: &Request) -> String {
    // Keyed by bearer token when present so authenticated users are limited
    // individually even behind a shared proxy IP.
    if let Some(auth_header) = request.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return format!("token:{}", token);
            }
        }
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .unwrap_or("unknown")
        .to_string()
}

pub fn wallet_rate_limiter() -> RateLimiter {
    RateLimiter::new(10, Duration::from_secs(60))
}

pub fn webhook_rate_limiter() -> RateLimiter {
    RateLimiter::new(100, Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.is_allowed("user:1"));
        assert!(limiter.is_allowed("user:1"));
        assert!(limiter.is_allowed("user:1"));
        assert!(!limiter.is_allowed("user:1"));
    }

    #[test]
    fn test_keys_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("user:1"));
        assert!(limiter.is_allowed("user:2"));
        assert!(!limiter.is_allowed("user:1"));
    }
}
