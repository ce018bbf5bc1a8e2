// service/idempotency.rs
//
// Deduplicates client-retried mutating requests by a caller-supplied key.
// The first successful response is stored for 24 hours under
// (key, user_id); a retry with the same key replays that stored response
// byte-for-byte instead of re-executing the handler.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::HttpError;
use crate::service::error::ServiceError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotent-replay";
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

pub fn is_valid_key(key: &str) -> bool {
    // Compiled per call; the regex is trivial and these are mutation-rate
    // requests, not hot-path reads.
    Regex::new(r"^[A-Za-z0-9_-]{16,128}$")
        .expect("idempotency key pattern is valid")
        .is_match(key)
}

pub fn extract_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// The response captured from the first execution: status + JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Pluggable get/set-with-expiry store. Production backs this with the
/// relational store (db::idempotencydb); the in-memory variant exists for
/// tests and is not safe across process instances.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str, user_id: Uuid) -> Result<Option<StoredResponse>, ServiceError>;
    async fn put(
        &self,
        key: &str,
        user_id: Uuid,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), ServiceError>;
}

impl std::fmt::Debug for dyn IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdempotencyStore")
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<(String, Uuid), (StoredResponse, DateTime<Utc>)>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &str, user_id: Uuid) -> Result<Option<StoredResponse>, ServiceError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(key.to_string(), user_id))
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(response, _)| response.clone()))
    }

    async fn put(
        &self,
        key: &str,
        user_id: Uuid,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry((key.to_string(), user_id))
            .or_insert((response.clone(), Utc::now() + ttl));
        Ok(())
    }
}

fn to_response(stored: StoredResponse, replayed: bool) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(stored.body)).into_response();
    if replayed {
        response
            .headers_mut()
            .insert(REPLAY_HEADER, "true".parse().unwrap());
    }
    response
}

/// Run `handler` at most once for the given key.
///
/// Without a key the handler executes directly and the caller forfeits the
/// dedup guarantee. A malformed key is rejected before the handler runs.
/// Storage is best-effort: a store write failure is logged, not surfaced,
/// since the financial operation already committed.
pub async fn with_idempotency<F, Fut>(
    store: &dyn IdempotencyStore,
    key: Option<&str>,
    user_id: Uuid,
    handler: F,
) -> Result<Response, HttpError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, serde_json::Value), HttpError>>,
{
    let key = match key {
        Some(key) => key,
        None => {
            let (status, body) = handler().await?;
            return Ok(to_response(
                StoredResponse {
                    status: status.as_u16(),
                    body,
                },
                false,
            ));
        }
    };

    if !is_valid_key(key) {
        return Err(HttpError::bad_request(
            "Idempotency-Key must be 16-128 characters of [A-Za-z0-9_-]",
        ));
    }

    if let Some(stored) = store.get(key, user_id).await.map_err(HttpError::from)? {
        tracing::info!("Replaying idempotent response for key {}", key);
        return Ok(to_response(stored, true));
    }

    let (status, body) = handler().await?;
    let stored = StoredResponse {
        status: status.as_u16(),
        body,
    };

    if let Err(e) = store
        .put(key, user_id, &stored, Duration::hours(IDEMPOTENCY_TTL_HOURS))
        .await
    {
        tracing::error!("Failed to persist idempotency record for key {}: {}", key, e);
    }

    Ok(to_response(stored, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("abcdef1234567890"));
        assert!(is_valid_key("a-b_c-d_e-f_g-h_i"));
        assert!(is_valid_key(&"x".repeat(128)));

        assert!(!is_valid_key("short"));
        assert!(!is_valid_key(&"x".repeat(129)));
        assert!(!is_valid_key("has spaces in the key"));
        assert!(!is_valid_key("bad!chars#here$1234"));
        assert!(!is_valid_key(""));
    }

    #[tokio::test]
    async fn test_replay_executes_handler_once() {
        let store = MemoryIdempotencyStore::new();
        let user_id = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        let run = || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let body = serde_json::json!({"call": n});
            async move { Ok::<_, HttpError>((StatusCode::OK, body)) }
        };

        let first = with_idempotency(&store, Some("abcdef1234567890"), user_id, run)
            .await
            .unwrap();
        let second = with_idempotency(&store, Some("abcdef1234567890"), user_id, run)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.headers().get(REPLAY_HEADER).is_none());
        assert_eq!(
            second.headers().get(REPLAY_HEADER).unwrap().to_str().unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_user() {
        let store = MemoryIdempotencyStore::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let user_id = Uuid::new_v4();
            let _ = with_idempotency(&store, Some("abcdef1234567890"), user_id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HttpError>((StatusCode::OK, serde_json::json!({}))) }
            })
            .await
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_key_executes_every_time() {
        let store = MemoryIdempotencyStore::new();
        let user_id = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _ = with_idempotency(&store, None, user_id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HttpError>((StatusCode::OK, serde_json::json!({}))) }
            })
            .await
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_handler() {
        let store = MemoryIdempotencyStore::new();
        let user_id = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        let result = with_idempotency(&store, Some("bad key"), user_id, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HttpError>((StatusCode::OK, serde_json::json!({}))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
