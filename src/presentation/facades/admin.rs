//! Admin facade: the login state machine entry points.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::entities::Identity;
use crate::domain::errors::DomainError;
use crate::presentation::facades::HandlerFuture;
use crate::presentation::websocket::WsSession;

#[derive(Debug, Default, Deserialize)]
struct LoginParams {
    #[serde(rename = "auth-tag", default)]
    auth_tag: Option<String>,
    #[serde(default)]
    credentials: Option<String>,
    #[serde(default)]
    macaroons: Option<Value>,
    /// Base64-wrapped session token.
    #[serde(default)]
    token: Option<String>,
}

async fn finish_login(
    session: &mut WsSession,
    identity: Identity,
) -> Result<Value, DomainError> {
    let state = session.state.clone();
    let caller = identity.tag();
    let admin = state
        .authorizer
        .is_administrator(&caller, &state.authorizer.jimm_controller_tag())
        .await?;
    let _ = state.identities.set_last_login(&identity.name, Utc::now()).await;

    session.admin = admin;
    session.principal = Some(identity.clone());

    Ok(json!({
        "controller-tag": state.authorizer.jimm_controller_tag().to_string(),
        "server-version": env!("CARGO_PKG_VERSION"),
        "user-info": {
            "identity": caller.to_string(),
            "display-name": identity.display_name,
            "controller-access": if admin { "superuser" } else { "login" },
        },
        "facades": session.registry.facades(),
    }))
}

/// `Admin.Login` accepts a session token, a client-credential pair carried
/// in `auth-tag`/`credentials`, or rides an already-authenticated browser
/// session. Macaroon logins are not supported.
pub fn login<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let params: LoginParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let now = Utc::now();

        if params.macaroons.as_ref().map_or(false, |m| !m.is_null()) {
            return Err(DomainError::NotImplemented);
        }

        if let Some(token) = &params.token {
            let identity = state.auth.verify_session_token(token, now).await?;
            return finish_login(session, identity).await;
        }

        if let (Some(auth_tag), Some(credentials)) = (&params.auth_tag, &params.credentials) {
            let client_id = auth_tag
                .strip_prefix("user-")
                .unwrap_or(auth_tag.as_str());
            let identity = state
                .auth
                .verify_client_credentials(client_id, credentials, now)
                .await?;
            return finish_login(session, identity).await;
        }

        // A browser session established at upgrade time authenticates an
        // otherwise-empty login.
        if let Some(identity) = session.browser_identity.clone() {
            return finish_login(session, identity).await;
        }

        Err(DomainError::Unauthorized)
    })
}

pub fn login_device<'a>(session: &'a mut WsSession, _params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let device = session.state.auth.device().await?;
        let response = json!({
            "verification-uri": device.verification_uri,
            "user-code": device.user_code,
        });
        session.device = Some(device);
        Ok(response)
    })
}

pub fn get_device_session_token<'a>(
    session: &'a mut WsSession,
    _params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let device = session
            .device
            .take()
            .ok_or_else(|| DomainError::BadRequest("no device login in progress".to_string()))?;
        let state = session.state.clone();
        let (identity, token) = state.auth.device_session_token(&device, Utc::now()).await?;
        let _ = finish_login(session, identity).await?;
        Ok(json!({ "session-token": token }))
    })
}

#[derive(Debug, Deserialize)]
struct SessionTokenLoginParams {
    #[serde(rename = "session-token")]
    session_token: String,
}

pub fn login_with_session_token<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let params: SessionTokenLoginParams = serde_json::from_value(params)?;
        let identity = session
            .state
            .auth
            .verify_session_token(&params.session_token, Utc::now())
            .await?;
        finish_login(session, identity).await
    })
}

#[derive(Debug, Deserialize)]
struct ClientCredentialsLoginParams {
    #[serde(rename = "client-id")]
    client_id: String,
    #[serde(rename = "client-secret")]
    client_secret: String,
}

pub fn login_with_client_credentials<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let params: ClientCredentialsLoginParams = serde_json::from_value(params)?;
        let identity = session
            .state
            .auth
            .verify_client_credentials(&params.client_id, &params.client_secret, Utc::now())
            .await?;
        finish_login(session, identity).await
    })
}

pub fn ping<'a>(_session: &'a mut WsSession, _params: Value) -> HandlerFuture<'a> {
    Box::pin(async move { Ok(json!({})) })
}
