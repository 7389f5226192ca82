use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::domain::errors::DomainError;
use crate::presentation::error_mapper::map_domain_error_with_op;
use crate::AppState;

const OP: &str = "wellknownapi.JWKS";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/.well-known/jwks.json", get(jwks))
}

/// Serve the public key set. Cache headers are tied to the stored expiry so
/// clients revalidate exactly when the set rotates.
async fn jwks(State(state): State<Arc<AppState>>) -> Response {
    let current = match state.jwks.current().await {
        Ok(current) => current,
        Err(e) => return map_domain_error_with_op(&e, OP).into_response(),
    };
    let Some((set, expiry)) = current else {
        let err = DomainError::NotFound("no JWKS stored".to_string());
        return map_domain_error_with_op(&err, OP).into_response();
    };
    let max_age = (expiry - Utc::now()).num_seconds().max(0);
    (
        StatusCode::OK,
        [
            (
                header::CACHE_CONTROL,
                format!("must-revalidate, max-age={}, immutable", max_age),
            ),
            (
                header::EXPIRES,
                expiry.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ),
        ],
        Json(set),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    #[test]
    fn test_expires_header_is_rfc1123() {
        let expiry = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            expiry.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            "Sun, 01 Mar 2026 12:30:00 GMT"
        );
    }
}
