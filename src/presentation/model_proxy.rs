// ============================================================================
// MODEL HTTP PROXY - /model/:uuid/*path
// ============================================================================
// Reescreve URLs model-scoped para o controller dono do modelo. A checagem
// de acesso (writer) acontece antes de qualquer contato com o backend.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::value_objects::ModelAccess;
use crate::presentation::{authenticate_request, error_mapper::map_domain_error};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/model/:uuid/*path", any(proxy))
}

#[allow(clippy::too_many_arguments)]
async fn proxy(
    State(state): State<Arc<AppState>>,
    Path((uuid, path)): Path<(Uuid, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    match proxy_inner(&state, uuid, &path, query, method, &headers, &jar, body).await {
        Ok(response) => response,
        Err(e) => map_domain_error(&e).into_response(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn proxy_inner(
    state: &AppState,
    uuid: Uuid,
    path: &str,
    query: Option<String>,
    method: Method,
    headers: &HeaderMap,
    jar: &CookieJar,
    body: Bytes,
) -> Result<Response, DomainError> {
    let identity = authenticate_request(state, headers, jar).await?;
    let caller = identity.tag();

    // Authorize before touching the backend or disclosing existence.
    let access = state
        .authorizer
        .get_user_model_access(&caller, &uuid)
        .await?;
    if access.map(|a| a < ModelAccess::Write).unwrap_or(true) {
        return Err(DomainError::Unauthorized);
    }

    let model = state
        .models
        .get_by_uuid(&uuid)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("model {}", uuid)))?;
    let controller = state
        .controllers
        .get_by_name(&model.controller)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("controller {}", model.controller)))?;
    let (_, password) = state
        .secrets
        .get_controller_credentials(&controller.name)
        .await?
        .ok_or_else(|| {
            DomainError::Internal(format!("no stored credentials for {}", controller.name))
        })?;

    let mut client = reqwest::Client::builder().timeout(Duration::from_secs(30));
    if let Some(ca) = &controller.ca_cert {
        let cert = reqwest::Certificate::from_pem(ca.as_bytes())
            .map_err(|e| DomainError::BadRequest(format!("invalid CA certificate: {}", e)))?;
        client = client.add_root_certificate(cert);
    }
    let client = client
        .build()
        .map_err(|e| DomainError::Internal(e.to_string()))?;

    let addr = controller
        .dial_addresses()
        .into_iter()
        .next()
        .ok_or_else(|| {
            DomainError::ApiConnection(format!("controller {} has no addresses", controller.name))
        })?;
    let mut url = format!("https://{}/model/{}/{}", addr, uuid, path);
    if let Some(query) = query {
        url.push('?');
        url.push_str(&query);
    }

    let mut request = client
        .request(method, &url)
        .basic_auth(caller.to_string(), Some(password))
        .body(body.to_vec());
    if let Some(content_type) = headers.get(axum::http::header::CONTENT_TYPE) {
        request = request.header(reqwest::header::CONTENT_TYPE, content_type.as_bytes());
    }

    let upstream = request.send().await.map_err(|e| {
        DomainError::ApiConnection(format!("proxying to {}: {}", controller.name, e))
    })?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| DomainError::Internal(e.to_string()))?;

    let mut response = (status, bytes.to_vec()).into_response();
    if let Some(content_type) = content_type {
        if let Ok(value) = axum::http::HeaderValue::from_str(&content_type) {
            response
                .headers_mut()
                .insert(axum::http::header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}
