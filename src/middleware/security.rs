use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

/// Rejects requests whose `Host` header is not in `TRUSTED_HOSTS`.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if is_trusted_host(&state.config.trusted_hosts, host) {
        return next.run(request).await;
    }

    tracing::warn!(host, "Rejected request for untrusted host");
    AppError::BadRequest("Invalid host header.".to_string()).into_response()
}

fn is_trusted_host(trusted_hosts: &[String], host: &str) -> bool {
    let hostname = strip_port(host.trim()).to_ascii_lowercase();
    trusted_hosts.iter().any(|trusted| {
        let trusted = trusted.trim().to_ascii_lowercase();
        if trusted == "*" {
            return true;
        }
        match trusted.strip_prefix("*.") {
            Some(suffix) => hostname.ends_with(&format!(".{suffix}")),
            None => hostname == trusted,
        }
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(address, _)| address.trim_start_matches('['))
            .unwrap_or(host);
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|character| character.is_ascii_digit()))
        .map(|(name, _)| name)
        .unwrap_or(host)
}
