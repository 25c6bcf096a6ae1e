use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::cache::PrincipalId;

use super::error::ApiError;

pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Resolve the calling principal from `x-principal-id`.
///
/// Authentication happens upstream; this only carries the identity into
/// request extensions for handlers and cache keys. Ids are restricted to a
/// separator-free alphabet so one principal's id can never spell another
/// principal's key prefix.
pub async fn require_principal(mut request: Request<Body>, next: Next) -> Response {
    let principal = request
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| is_principal_id(value))
        .map(PrincipalId::new);

    let Some(principal) = principal else {
        return ApiError::unauthorized().into_response();
    };

    request.extensions_mut().insert(principal.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    response
}

fn is_principal_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}
