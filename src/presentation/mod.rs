// ============================================================================
// PRESENTATION LAYER MODULE
// ============================================================================
// Superfície HTTP/websocket do serviço: REST, JWKS, proxy de modelos e o
// dispatcher RPC compatível com Juju.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::{middleware, middleware::Next, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use rand::RngCore;
use tracing::{info_span, Instrument};

pub mod acl_controller;
pub mod auth_controller;
pub mod debug_controller;
pub mod error_mapper;
pub mod facades;
pub mod model_proxy;
pub mod websocket;
pub mod wellknown;

pub use error_mapper::ErrorResponse;

use crate::auth::SESSION_NAME;
use crate::domain::entities::Identity;
use crate::domain::errors::DomainError;
use crate::AppState;

/// Resolve the caller of a plain HTTP request: a bearer session token takes
/// precedence, then the browser-session cookie.
pub async fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<Identity, DomainError> {
    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return state.auth.verify_session_token(token, Utc::now()).await;
        }
    }
    if let Some(cookie) = jar.get(SESSION_NAME) {
        return state.auth.session_identity(cookie.value(), Utc::now()).await;
    }
    Err(DomainError::Unauthorized)
}

/// Wrap every request in a span carrying a short correlation id, so log
/// lines emitted deeper down (dispatcher, proxy, pool) can be tied back to
/// the inbound request. Long-lived upgrades (the RPC websocket, the model
/// relay) inherit the same span for their whole lifetime.
async fn request_span(req: Request, next: Next) -> axum::response::Response {
    let mut raw = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let span = info_span!(
        "request",
        id = %hex::encode(raw),
        verb = %req.method(),
        route = %req.uri().path(),
    );
    next.run(req).instrument(span).await
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(wellknown::routes())
        .merge(auth_controller::routes())
        .merge(debug_controller::routes())
        .merge(acl_controller::routes())
        .merge(websocket::routes())
        .merge(model_proxy::routes())
        .layer(middleware::from_fn(request_span))
}
