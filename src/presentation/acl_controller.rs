// ============================================================================
// SELF-ADMINISTERED ACLS - /admin/acls/*
// ============================================================================
// ACLs administradas pelo próprio serviço; a ACL `admin` controla quem pode
// ler e alterar as demais. O administrador inicial é o controller-admin.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::domain::errors::DomainError;
use crate::presentation::{authenticate_request, error_mapper::map_domain_error, ErrorResponse};
use crate::AppState;

/// The ACL that gates access to every ACL endpoint.
pub const ADMIN_ACL: &str = "admin";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/admin/acls/:name",
        get(get_acl).put(set_acl).post(modify_acl),
    )
}

async fn require_acl_admin(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<(), DomainError> {
    let identity = authenticate_request(state, headers, jar).await?;
    let admins = state
        .acls
        .get(ADMIN_ACL)
        .await?
        .unwrap_or_default();
    if state
        .authorizer
        .check_acl(&identity.name, &admins)
        .is_allowed()
    {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!(
            "access denied for {}",
            identity.name
        )))
    }
}

async fn get_acl(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, ErrorResponse> {
    require_acl_admin(&state, &headers, &jar)
        .await
        .map_err(|e| map_domain_error(&e))?;
    let users = state
        .acls
        .get(&name)
        .await
        .map_err(|e| map_domain_error(&e))?
        .ok_or_else(|| map_domain_error(&DomainError::NotFound(format!("ACL {}", name))))?;
    Ok(Json(json!({ "users": users })))
}

#[derive(Debug, Deserialize)]
struct SetAclRequest {
    users: Vec<String>,
}

async fn set_acl(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<SetAclRequest>,
) -> Result<StatusCode, ErrorResponse> {
    require_acl_admin(&state, &headers, &jar)
        .await
        .map_err(|e| map_domain_error(&e))?;
    state
        .acls
        .get(&name)
        .await
        .map_err(|e| map_domain_error(&e))?
        .ok_or_else(|| map_domain_error(&DomainError::NotFound(format!("ACL {}", name))))?;
    state
        .acls
        .set(&name, &request.users)
        .await
        .map_err(|e| map_domain_error(&e))?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct ModifyAclRequest {
    #[serde(default)]
    add: Vec<String>,
}

async fn modify_acl(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<ModifyAclRequest>,
) -> Result<StatusCode, ErrorResponse> {
    require_acl_admin(&state, &headers, &jar)
        .await
        .map_err(|e| map_domain_error(&e))?;
    state
        .acls
        .get(&name)
        .await
        .map_err(|e| map_domain_error(&e))?
        .ok_or_else(|| map_domain_error(&DomainError::NotFound(format!("ACL {}", name))))?;
    state
        .acls
        .add(&name, &request.add)
        .await
        .map_err(|e| map_domain_error(&e))?;
    Ok(StatusCode::OK)
}
