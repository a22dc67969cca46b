use crate::models::ApiError;
use crate::rate_limit::{RateDecision, RateLimiter};
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "X-Flipscout-Key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, AuthContext>>,
    limiter: Arc<RateLimiter>,
}

/// Authenticated caller, inserted into request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub owner_id: String,
    pub api_key_id: String,
}

impl AuthState {
    /// `raw_keys` is `owner:key,owner:key`.
    pub fn new(raw_keys: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            records: Arc::new(parse_api_keys(raw_keys)),
            limiter,
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).cloned()
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        let response = unauthorized_response(
            "missing_api_key",
            "Provide X-Flipscout-Key or Bearer token",
        );
        return Ok(response);
    };

    let Some(context) = state.authenticate(&presented) else {
        let response = unauthorized_response("invalid_api_key", "Key not recognized");
        return Ok(response);
    };

    let identity = network_identity(&request);
    let decision = state
        .limiter
        .check(&identity, request.uri().path(), Some(&context.owner_id))
        .await;
    if !decision.allowed {
        let mut response = too_many_requests("rate_limited", "Too many requests");
        apply_denied_headers(&decision, response.headers_mut());
        return Ok(response);
    }

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;
    apply_headers(&decision, response.headers_mut());
    Ok(response)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// First `X-Forwarded-For` hop, else the peer address.
fn network_identity(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

fn parse_api_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let owner_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (owner_id, key) {
            (Some(owner), Some(secret)) => {
                let record = AuthContext {
                    owner_id: owner.to_string(),
                    api_key_id: format!("key-{:02}", idx + 1),
                };
                entries.insert(secret.to_string(), record);
            }
            _ => warn!(
                target = "flipscout.api",
                "ignored malformed DEMO_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "flipscout.api",
            "DEMO_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            AuthContext {
                owner_id: "demo-owner".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "flipscout.api",
            key_count = entries.len(),
            "loaded API keys"
        );
    }

    entries
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

fn reset_secs(decision: &RateDecision) -> u64 {
    let wait = decision.retry_after();
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

fn apply_headers(decision: &RateDecision, headers: &mut http::HeaderMap) {
    headers.insert("X-RateLimit-Limit", header_value(u64::from(decision.limit)));
    headers.insert(
        "X-RateLimit-Remaining",
        header_value(u64::from(decision.remaining)),
    );
    headers.insert("X-RateLimit-Reset", header_value(reset_secs(decision)));
}

fn apply_denied_headers(decision: &RateDecision, headers: &mut http::HeaderMap) {
    headers.insert(
        http::header::RETRY_AFTER,
        header_value(reset_secs(decision).max(1)),
    );
    apply_headers(decision, headers);
    headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{RateLimitTable, RateRule};
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    fn app(limit: u32) -> Router {
        let limiter = Arc::new(RateLimiter::new(RateLimitTable {
            default: RateRule::new(limit, 60),
            endpoints: Vec::new(),
        }));
        let state = AuthState::new("acme:secret-1, bad-entry", limiter);
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route_layer(middleware::from_fn_with_state(state, require_api_auth))
    }

    fn request(key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/ping")
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_token_wins_over_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));
        headers.remove(http::header::AUTHORIZATION);
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn malformed_key_entries_are_ignored() {
        let keys = parse_api_keys("acme:k1, broken, :k2,beta:k3");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["k3"].owner_id, "beta");
        assert_eq!(keys["k3"].api_key_id, "key-04");
        assert!(parse_api_keys("").contains_key("demo-key"));
    }

    #[tokio::test]
    async fn missing_and_unknown_keys_are_rejected() {
        let response = app(5).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app(5).oneshot(request(Some("nope"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn exhausted_window_returns_429_with_retry_after() {
        let app = app(1);
        let first = app.clone().oneshot(request(Some("secret-1"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["X-RateLimit-Limit"], "1");
        assert_eq!(first.headers()["X-RateLimit-Remaining"], "0");

        let second = app.oneshot(request(Some("secret-1"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = second.headers()[http::header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry));
    }
}
