use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::ApiError;

const API_KEYS_VAR: &str = "AIVIS_API_KEYS";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 64;

/// Request id carried in request extensions and echoed in every envelope.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Bearer tokens accepted on the scan and brand routes. An empty key list
/// means auth is off, which is only allowed in development.
#[derive(Debug, Clone)]
pub struct AuthState {
    keys: Arc<[String]>,
}

impl AuthState {
    /// Reads comma-separated tokens from `AIVIS_API_KEYS`.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        Self::from_keys(&raw, is_development)
    }

    pub fn from_keys(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        if keys.is_empty() {
            anyhow::ensure!(
                is_development,
                "{API_KEYS_VAR} must list at least one bearer token outside development"
            );
            tracing::warn!("{API_KEYS_VAR} is empty; scan routes are unauthenticated");
        }

        Ok(Self { keys: keys.into() })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    fn allows(&self, token: &str) -> bool {
        // Compare against every key so timing does not reveal which one matched.
        self.keys.iter().fold(false, |found, key| {
            found | bool::from(key.as_bytes().ct_eq(token.as_bytes()))
        })
    }
}

/// Client-supplied ids are kept when short and printable; anything else is
/// replaced so log lines and response headers stay well-formed.
fn accepted_request_id(value: Option<&HeaderValue>) -> Option<String> {
    let id = value?.to_str().ok()?.trim();
    let well_formed = !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic());
    well_formed.then(|| id.to_string())
}

/// Assigns a request id, runs the request inside a span carrying it, and
/// echoes it in the `x-request-id` response header.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = accepted_request_id(req.headers().get(REQUEST_ID_HEADER))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).instrument(span).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

/// Rejects requests without an accepted bearer token using the API error
/// envelope, so clients see the same shape as handler errors.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled() {
        return next.run(req).await;
    }

    if extract_bearer_token(req.headers().get(AUTHORIZATION)).is_some_and(|t| auth.allows(t)) {
        return next.run(req).await;
    }

    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    tracing::debug!(%request_id, "rejected request without a valid bearer token");
    ApiError::new(
        request_id,
        "unauthorized",
        "missing or invalid bearer token",
    )
    .into_response()
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_extracted_and_trimmed() {
        let header = HeaderValue::from_static("Bearer  scan-key ");
        assert_eq!(extract_bearer_token(Some(&header)), Some("scan-key"));
    }

    #[test]
    fn other_schemes_and_blank_tokens_are_ignored() {
        let basic = HeaderValue::from_static("Basic abc123");
        let blank = HeaderValue::from_static("Bearer   ");
        assert_eq!(extract_bearer_token(Some(&basic)), None);
        assert_eq!(extract_bearer_token(Some(&blank)), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    #[test]
    fn empty_key_list_disables_auth_in_development() {
        let state = AuthState::from_keys(" , ", true).expect("dev allows no keys");
        assert!(!state.enabled());
    }

    #[test]
    fn empty_key_list_fails_outside_development() {
        let err = AuthState::from_keys("", false).expect_err("keys required");
        assert!(err.to_string().contains(API_KEYS_VAR));
    }

    #[test]
    fn only_configured_keys_are_allowed() {
        let state = AuthState::from_keys("alpha, beta, alpha", false).expect("keys");
        assert!(state.enabled());
        assert_eq!(state.keys.len(), 2);
        assert!(state.allows("alpha"));
        assert!(state.allows("beta"));
        assert!(!state.allows("alph"));
        assert!(!state.allows(""));
    }

    #[test]
    fn malformed_client_request_ids_are_replaced() {
        let ok = HeaderValue::from_static("client-42");
        let spaced = HeaderValue::from_static("has space");
        let long = HeaderValue::from_str(&"x".repeat(MAX_REQUEST_ID_LEN + 1)).expect("header");
        assert_eq!(accepted_request_id(Some(&ok)).as_deref(), Some("client-42"));
        assert_eq!(accepted_request_id(Some(&spaced)), None);
        assert_eq!(accepted_request_id(Some(&long)), None);
        assert_eq!(accepted_request_id(None), None);
    }
}
