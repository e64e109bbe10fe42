use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const JWT_AUDIENCE: &str = "authenticated";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

pub async fn require_viewer(state: &AppState, headers: &HeaderMap) -> AppResult<Viewer> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_str(headers, "x-user-id") {
            return Ok(Viewer {
                id: user_id.to_string(),
                email: None,
            });
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing bearer token.".to_string()))?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return decode_viewer(token, secret);
    }

    let cache_key = token_digest(token);
    if let Some(viewer) = state.viewer_cache.get(&cache_key).await {
        return Ok(viewer);
    }
    let viewer = fetch_viewer(state, token).await?;
    state.viewer_cache.insert(cache_key, viewer.clone()).await;
    Ok(viewer)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = header_str(headers, AUTHORIZATION.as_str())?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn decode_viewer(token: &str, secret: &str) -> AppResult<Viewer> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[JWT_AUDIENCE]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Rejected bearer token");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    viewer_from_parts(Some(data.claims.sub.as_str()), data.claims.email)
}

async fn fetch_viewer(state: &AppState, token: &str) -> AppResult<Viewer> {
    let (Some(base_url), Some(service_key)) = (
        state.config.supabase_url.as_deref(),
        state.config.supabase_service_role_key.as_deref(),
    ) else {
        return Err(AppError::Dependency(
            "Authentication is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY."
                .to_string(),
        ));
    };

    let endpoint = auth_user_endpoint(base_url)?;
    let response = state
        .http_client
        .get(endpoint)
        .header("apikey", service_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Supabase auth request failed");
            AppError::Dependency("Supabase auth request failed.".to_string())
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(AppError::Unauthorized(
            "Unauthorized: invalid or expired token.".to_string(),
        ));
    }
    if !status.is_success() {
        tracing::error!(status = status.as_u16(), "Supabase auth returned an error");
        return Err(AppError::Dependency(
            "Supabase auth request failed.".to_string(),
        ));
    }

    let body: Value = response.json().await.map_err(|error| {
        tracing::error!(error = %error, "Supabase auth returned an unreadable body");
        AppError::Dependency("Supabase auth request failed.".to_string())
    })?;
    viewer_from_parts(
        body.get("id").and_then(Value::as_str),
        body.get("email")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    )
}

fn auth_user_endpoint(base_url: &str) -> AppResult<Url> {
    let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
    Url::parse(&normalized)
        .and_then(|base| base.join("auth/v1/user"))
        .map_err(|error| AppError::Dependency(format!("Invalid SUPABASE_URL: {error}")))
}

fn viewer_from_parts(id: Option<&str>, email: Option<String>) -> AppResult<Viewer> {
    let id = id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing user.".to_string()))?;
    Ok(Viewer {
        id: id.to_string(),
        email: email.filter(|value| !value.trim().is_empty()),
    })
}

fn token_digest(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
