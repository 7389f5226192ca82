// ============================================================================
// WEBSOCKET RPC - /api E /model/:uuid/api
// ============================================================================
// O endpoint /api fala o RPC de facades compatível com Juju: máquina de
// estados de login, registry explícito e auditoria por chamada. O endpoint
// model-scoped faz relay para o controller dono do modelo, trocando o login
// do cliente por um JWT cunhado com as permissões resolvidas.

use std::sync::Arc;

use axum::{
    extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::oidc::DeviceAuthResponse;
use crate::auth::SESSION_NAME;
use crate::domain::entities::{AuditLogEntry, Identity};
use crate::domain::errors::DomainError;
use crate::domain::value_objects::Tag;
use crate::jujuapi::conn::dial_ws;
use crate::jujuapi::params::RpcMessage;
use crate::presentation::facades::Registry;
use crate::presentation::{authenticate_request, error_mapper::map_domain_error};
use crate::AppState;

/// RFC 6455 internal-server-error close code.
const CLOSE_INTERNAL_SERVER_ERR: u16 = 1011;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api", get(api_handler))
        .route("/model/:uuid/api", get(model_ws_handler))
}

/// Per-connection dispatcher state. The login state machine lives here:
/// `principal == None` is unauth; `admin` marks the implicit admin
/// transition after a successful login.
pub struct WsSession {
    pub state: Arc<AppState>,
    pub registry: Arc<Registry>,
    pub principal: Option<Identity>,
    pub admin: bool,
    pub browser_identity: Option<Identity>,
    pub device: Option<DeviceAuthResponse>,
}

impl WsSession {
    pub fn require_auth(&self) -> Result<Tag, DomainError> {
        self.principal
            .as_ref()
            .map(Identity::tag)
            .ok_or(DomainError::Unauthorized)
    }
}

fn error_frame(request_id: Option<u64>, code: &str, message: &str) -> RpcMessage {
    RpcMessage {
        request_id,
        error: Some(message.to_string()),
        error_code: Some(code.to_string()),
        ..Default::default()
    }
}

/// Methods accepted while unauthenticated.
fn is_login_method(facade: &str, method: &str) -> bool {
    facade == "Admin" && (method.starts_with("Login") || method == "GetDeviceSessionToken")
}

/// Handlers run under a 30-second wall timeout, except the long-running
/// operations (model creation, migrations, device-grant polling).
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

fn is_relaxed_method(method: &str) -> bool {
    matches!(
        method,
        "AddModel" | "ImportModel" | "InitiateMigration" | "GetDeviceSessionToken"
    )
}

async fn api_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    // Cookie authentication happens at HTTP level so browser sessions can
    // ride the upgrade. A missing cookie is fine; an invalid one is not.
    let browser: Result<Option<Identity>, DomainError> = match jar.get(SESSION_NAME) {
        None => Ok(None),
        Some(cookie) => state
            .auth
            .session_identity(cookie.value(), Utc::now())
            .await
            .map(Some),
    };
    ws.on_upgrade(move |socket| handle_api_socket(state, socket, browser))
}

async fn close_internal_error(socket: &mut WebSocket) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: CLOSE_INTERNAL_SERVER_ERR,
            reason: "internal server error".into(),
        })))
        .await;
}

async fn handle_api_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    browser: Result<Option<Identity>, DomainError>,
) {
    let browser_identity = match browser {
        Ok(identity) => identity,
        Err(_) => {
            // Present-but-invalid cookie fails the connection outright.
            close_internal_error(&mut socket).await;
            return;
        }
    };

    let mut session = WsSession {
        registry: state.registry.clone(),
        state,
        principal: None,
        admin: false,
        browser_identity,
        device: None,
    };

    while let Some(frame) = socket.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let msg: RpcMessage = match serde_json::from_str::<RpcMessage>(&text) {
            Ok(msg) if msg.is_request() => msg,
            _ => {
                let frame = error_frame(None, "bad request", "cannot parse request");
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match dispatch(&mut session, msg).await {
            Ok(response) => {
                if send_frame(&mut socket, &response).await.is_err() {
                    break;
                }
            }
            Err(Panicked) => {
                close_internal_error(&mut socket).await;
                break;
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &RpcMessage) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    socket.send(WsMessage::Text(text)).await.map_err(|_| ())
}

struct Panicked;

async fn dispatch(session: &mut WsSession, msg: RpcMessage) -> Result<RpcMessage, Panicked> {
    let request_id = msg.request_id;
    let facade = msg.type_.clone().unwrap_or_default();
    let method = msg.request.clone().unwrap_or_default();
    let version = msg.version.unwrap_or(0);

    if session.principal.is_none() && !is_login_method(&facade, &method) {
        return Ok(error_frame(request_id, "not logged in", "not logged in"));
    }

    let Some(handler) = session.registry.lookup(&facade, version, &method) else {
        return Ok(error_frame(
            request_id,
            "method not allowed",
            &format!("no such request - method {}.{} is not implemented", facade, method),
        ));
    };

    let params = msg.params.clone();
    let fut = std::panic::AssertUnwindSafe(handler(session, params)).catch_unwind();
    let outcome = if is_relaxed_method(&method) {
        fut.await
    } else {
        match tokio::time::timeout(RPC_TIMEOUT, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Err(DomainError::Internal("request timed out".to_string()))),
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(%facade, %method, "facade handler panicked");
            return Err(Panicked);
        }
    };

    audit_call(session, &facade, &method, &msg, &result).await;

    Ok(match result {
        Ok(response) => RpcMessage {
            request_id,
            response,
            ..Default::default()
        },
        Err(e) => error_frame(request_id, e.code(), &e.to_string()),
    })
}

/// Every dispatched facade call is recorded; pings are noise and skipped.
async fn audit_call(
    session: &WsSession,
    facade: &str,
    method: &str,
    msg: &RpcMessage,
    result: &Result<Value, DomainError>,
) {
    if facade == "Pinger" {
        return;
    }
    let user_tag = session
        .principal
        .as_ref()
        .map(|identity| identity.tag().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let model = msg
        .params
        .get("model-tag")
        .and_then(Value::as_str)
        .map(str::to_string);
    let entry = AuditLogEntry {
        time: Utc::now(),
        user_tag,
        facade_method: format!("{}.{}", facade, method),
        params: msg.params.clone(),
        model,
        success: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    if let Err(e) = session.state.audit.append(&entry).await {
        warn!(error = %e, "audit append failed");
    }
}

// ---- model websocket relay ------------------------------------------------

async fn model_ws_handler(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match authenticate_request(&state, &headers, &jar).await {
        Ok(identity) => identity,
        Err(e) => return map_domain_error(&e).into_response(),
    };
    let caller = identity.tag();
    match state.authorizer.can_read_model(&caller, &uuid).await {
        Ok(true) => {}
        Ok(false) => return map_domain_error(&DomainError::Unauthorized).into_response(),
        Err(e) => return map_domain_error(&e).into_response(),
    }
    ws.on_upgrade(move |socket| model_relay(state, socket, caller, uuid))
}

/// Substitute the client's login with a freshly-minted (or cached) JWT
/// asserting the caller's resolved permissions on the target controller.
async fn login_token(
    state: &AppState,
    caller: &Tag,
    controller_uuid: &Uuid,
    model_uuid: &Uuid,
) -> Result<String, DomainError> {
    let now = Utc::now();
    if let Some(token) = state.pool.cached_jwt(controller_uuid, &caller.id, now) {
        return Ok(token);
    }
    let access = state
        .authorizer
        .resolve_permissions(caller, controller_uuid, Some(model_uuid))
        .await?;
    let (token, expiry) = state
        .jwt
        .mint(now, &caller.id, controller_uuid, access)
        .await?;
    state
        .pool
        .store_jwt(controller_uuid, &caller.id, token.clone(), expiry);
    Ok(token)
}

async fn model_relay(state: Arc<AppState>, mut client: WebSocket, caller: Tag, uuid: Uuid) {
    let setup = async {
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
        let addr = controller.dial_addresses().into_iter().next().ok_or_else(|| {
            DomainError::ApiConnection(format!("controller {} has no addresses", controller.name))
        })?;
        let upstream = dial_ws(
            &addr,
            &format!("/model/{}/api", uuid),
            controller.ca_cert.as_deref(),
            Duration::from_secs(20),
        )
        .await?;
        Ok::<_, DomainError>((controller, upstream))
    };

    let (controller, upstream) = match setup.await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, "model relay setup failed");
            close_internal_error(&mut client).await;
            return;
        }
    };

    let (mut up_tx, mut up_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    use tokio_tungstenite::tungstenite::Message as TMessage;

    loop {
        tokio::select! {
            frame = client_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                let forward = match frame {
                    WsMessage::Text(text) => {
                        let substituted = substitute_login(
                            &state, &caller, &controller.uuid, &uuid, &text,
                        )
                        .await;
                        TMessage::Text(substituted.unwrap_or(text))
                    }
                    WsMessage::Binary(data) => TMessage::Binary(data),
                    WsMessage::Ping(data) => TMessage::Ping(data),
                    WsMessage::Pong(data) => TMessage::Pong(data),
                    WsMessage::Close(_) => break,
                };
                if up_tx.send(forward).await.is_err() {
                    break;
                }
            }
            frame = up_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                let forward = match frame {
                    TMessage::Text(text) => WsMessage::Text(text.to_string()),
                    TMessage::Binary(data) => WsMessage::Binary(data.into()),
                    TMessage::Ping(data) => WsMessage::Ping(data.into()),
                    TMessage::Pong(data) => WsMessage::Pong(data.into()),
                    TMessage::Close(_) => break,
                    TMessage::Frame(_) => continue,
                };
                if client_tx.send(forward).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = up_tx.close().await;
    let _ = client_tx.close().await;
}

async fn substitute_login(
    state: &AppState,
    caller: &Tag,
    controller_uuid: &Uuid,
    model_uuid: &Uuid,
    text: &str,
) -> Option<String> {
    let mut msg: Value = serde_json::from_str(text).ok()?;
    if msg.get("type")?.as_str()? != "Admin" || msg.get("request")?.as_str()? != "Login" {
        return None;
    }
    let token = match login_token(state, caller, controller_uuid, model_uuid).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "minting relay JWT failed");
            return None;
        }
    };
    msg["params"] = serde_json::json!({ "token": token, "client-version": env!("CARGO_PKG_VERSION") });
    serde_json::to_string(&msg).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_methods_allowed_before_auth() {
        assert!(is_login_method("Admin", "Login"));
        assert!(is_login_method("Admin", "LoginDevice"));
        assert!(is_login_method("Admin", "LoginWithClientCredentials"));
        assert!(is_login_method("Admin", "GetDeviceSessionToken"));
        assert!(!is_login_method("Admin", "Logout"));
        assert!(!is_login_method("JIMM", "ListControllers"));
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = error_frame(Some(4), "not logged in", "not logged in");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["request-id"], 4);
        assert_eq!(value["error-code"], "not logged in");
        assert!(value.get("response").is_none());
    }
}
