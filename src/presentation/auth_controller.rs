// ============================================================================
// AUTH CONTROLLER - FLUXO DE LOGIN NO BROWSER (OIDC authorization code)
// ============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;

use crate::auth::SESSION_NAME;
use crate::domain::errors::DomainError;
use crate::presentation::error_mapper::map_domain_error;
use crate::AppState;

const STATE_COOKIE: &str = "jimm-oauth-state";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", get(logout))
        .route("/auth/whoami", get(whoami))
}

fn callback_uri(state: &AppState) -> String {
    format!("https://{}/auth/callback", state.config.public_host())
}

async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let oauth_state = hex::encode(raw);
    let url = match state
        .auth
        .login_redirect_url(&callback_uri(&state), &oauth_state)
    {
        Ok(url) => url,
        Err(e) => return map_domain_error(&e).into_response(),
    };

    let mut cookie = Cookie::new(STATE_COOKIE, oauth_state);
    cookie.set_path("/auth");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    (jar.add(cookie), Redirect::temporary(&url)).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    #[serde(default)]
    state: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    if expected.is_none() || expected.as_deref() != query.state.as_deref() {
        let err = DomainError::BadRequest("OAuth state mismatch".to_string());
        return map_domain_error(&err).into_response();
    }

    match state
        .auth
        .callback(&query.code, &callback_uri(&state), Utc::now())
        .await
    {
        Ok((_identity, session)) => {
            let mut cookie = Cookie::new(SESSION_NAME, session.id);
            cookie.set_path("/");
            cookie.set_http_only(true);
            cookie.set_same_site(SameSite::Lax);
            let jar = jar.remove(Cookie::from(STATE_COOKIE)).add(cookie);
            (jar, Redirect::temporary(state.auth.dashboard_url())).into_response()
        }
        Err(e) => map_domain_error(&e).into_response(),
    }
}

async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(cookie) = jar.get(SESSION_NAME) else {
        return map_domain_error(&DomainError::Unauthorized).into_response();
    };
    match state.auth.logout(cookie.value()).await {
        Ok(()) => {
            let jar = jar.remove(Cookie::from(SESSION_NAME));
            (jar, StatusCode::OK).into_response()
        }
        Err(e) => map_domain_error(&e).into_response(),
    }
}

async fn whoami(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(cookie) = jar.get(SESSION_NAME) else {
        return map_domain_error(&DomainError::Unauthorized).into_response();
    };
    match state.auth.session_identity(cookie.value(), Utc::now()).await {
        Ok(identity) => Json(json!({
            "display-name": identity.display_name,
            "email": identity.name,
        }))
        .into_response(),
        Err(e) => map_domain_error(&e).into_response(),
    }
}
