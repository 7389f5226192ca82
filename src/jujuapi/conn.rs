use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::jujuapi::params::*;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a TLS connector trusting only the controller's CA when one is
/// recorded, falling back to the system roots otherwise.
fn tls_connector(ca_cert: Option<&str>) -> Result<Option<Connector>, DomainError> {
    let Some(pem) = ca_cert else {
        return Ok(None);
    };
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = pem.as_bytes();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert =
            cert.map_err(|e| DomainError::BadRequest(format!("invalid CA certificate: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| DomainError::BadRequest(format!("invalid CA certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(DomainError::BadRequest(
            "invalid CA certificate: no certificates found".to_string(),
        ));
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Some(Connector::Rustls(Arc::new(config))))
}

/// Dial a websocket endpoint on a controller. `path` is `/api` for the
/// controller endpoint or `/model/<uuid>/api` for a model-scoped one.
pub async fn dial_ws(
    addr: &str,
    path: &str,
    ca_cert: Option<&str>,
    dial_timeout: Duration,
) -> Result<WsStream, DomainError> {
    let url = format!("wss://{}{}", addr, path);
    let connector = tls_connector(ca_cert)?;
    let dial = connect_async_tls_with_config(url.as_str(), None, false, connector);
    match timeout(dial_timeout, dial).await {
        Ok(Ok((ws, _resp))) => Ok(ws),
        Ok(Err(e)) => Err(DomainError::ApiConnection(format!("{}: {}", url, e))),
        Err(_) => Err(DomainError::ApiConnection(format!("{}: dial timed out", url))),
    }
}

fn rpc_error(code: Option<&str>, message: &str) -> DomainError {
    match code {
        Some("unauthorized access") => DomainError::Unauthorized,
        Some("not found") => DomainError::NotFound(message.to_string()),
        Some("already exists") => DomainError::AlreadyExists(message.to_string()),
        Some("bad request") => DomainError::BadRequest(message.to_string()),
        Some("method not allowed") => DomainError::MethodNotAllowed(message.to_string()),
        Some("not implemented") => DomainError::NotImplemented,
        _ => DomainError::Internal(message.to_string()),
    }
}

/// An authenticated Juju RPC connection. Calls are correlated by request id;
/// a background reader routes responses to their waiting callers.
pub struct Connection {
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<Message>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcMessage>>>>,
    alive: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub async fn dial(
        addr: &str,
        model_uuid: Option<&Uuid>,
        ca_cert: Option<&str>,
        dial_timeout: Duration,
    ) -> Result<Connection, DomainError> {
        let path = match model_uuid {
            Some(uuid) => format!("/model/{}/api", uuid),
            None => "/api".to_string(),
        };
        let ws = dial_ws(addr, &path, ca_cert, dial_timeout).await?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcMessage>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let msg: RpcMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "discarding unparseable RPC frame");
                        continue;
                    }
                };
                if let Some(id) = msg.request_id {
                    if let Some(waiter) = reader_pending.lock().remove(&id) {
                        let _ = waiter.send(msg);
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            // Wake up every caller still waiting on a response.
            reader_pending.lock().clear();
        });

        Ok(Connection {
            next_id: AtomicU64::new(1),
            tx,
            pending,
            alive,
            reader,
            writer,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn call(
        &self,
        facade: &str,
        version: u32,
        id: Option<&str>,
        request: &str,
        params: Value,
    ) -> Result<Value, DomainError> {
        if !self.is_alive() {
            return Err(DomainError::ApiConnection("connection closed".to_string()));
        }
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = RpcMessage {
            request_id: Some(request_id),
            type_: Some(facade.to_string()),
            id: id.map(str::to_string),
            version: Some(version),
            request: Some(request.to_string()),
            params,
            ..Default::default()
        };
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, waiter_tx);
        let text = serde_json::to_string(&frame)?;
        debug!(facade, request, request_id, "sending RPC request");
        if self.tx.send(Message::Text(text.into())).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(DomainError::ApiConnection("connection closed".to_string()));
        }
        let msg = waiter_rx
            .await
            .map_err(|_| DomainError::ApiConnection("connection closed".to_string()))?;
        if let Some(error) = msg.error {
            return Err(rpc_error(msg.error_code.as_deref(), &error));
        }
        Ok(msg.response)
    }

    /// Admin.Login with either password credentials or a JIMM-minted JWT.
    pub async fn login(
        &self,
        auth_tag: Option<&str>,
        credentials: Option<&str>,
        token: Option<&str>,
    ) -> Result<LoginResult, DomainError> {
        let request = LoginRequest {
            auth_tag: auth_tag.map(str::to_string),
            credentials: credentials.map(str::to_string),
            token: token.map(str::to_string),
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        };
        let response = self
            .call("Admin", 3, None, "Login", serde_json::to_value(&request)?)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn watch_all_models(&self) -> Result<String, DomainError> {
        let response = self
            .call("Controller", 11, None, "WatchAllModels", json!({}))
            .await?;
        let id: AllWatcherId = serde_json::from_value(response)?;
        Ok(id.watcher_id)
    }

    pub async fn all_watcher_next(&self, watcher_id: &str) -> Result<Vec<Delta>, DomainError> {
        let response = self
            .call("AllModelWatcher", 4, Some(watcher_id), "Next", json!({}))
            .await?;
        let next: AllWatcherNextResults = serde_json::from_value(response)?;
        Ok(next.deltas)
    }

    pub async fn all_watcher_stop(&self, watcher_id: &str) -> Result<(), DomainError> {
        self.call("AllModelWatcher", 4, Some(watcher_id), "Stop", json!({}))
            .await?;
        Ok(())
    }

    pub async fn create_model(
        &self,
        name: &str,
        owner_tag: &str,
        cloud_tag: &str,
        region: Option<&str>,
        credential_tag: Option<&str>,
    ) -> Result<WireModelInfo, DomainError> {
        let mut params = json!({
            "name": name,
            "owner-tag": owner_tag,
            "cloud-tag": cloud_tag,
        });
        if let Some(region) = region {
            params["region"] = json!(region);
        }
        if let Some(credential) = credential_tag {
            params["credential"] = json!(credential);
        }
        let response = self
            .call("ModelManager", 9, None, "CreateModel", params)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn model_info(&self, model_uuid: &Uuid) -> Result<WireModelInfo, DomainError> {
        let response = self
            .call(
                "ModelManager",
                9,
                None,
                "ModelInfo",
                json!({ "entities": [{ "tag": format!("model-{}", model_uuid) }] }),
            )
            .await?;
        let result = response
            .get("results")
            .and_then(|r| r.get(0))
            .cloned()
            .ok_or_else(|| DomainError::Internal("empty ModelInfo result".to_string()))?;
        if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_str);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("model info failed");
            return Err(rpc_error(code, message));
        }
        Ok(serde_json::from_value(
            result
                .get("result")
                .cloned()
                .ok_or_else(|| DomainError::Internal("empty ModelInfo result".to_string()))?,
        )?)
    }

    pub async fn destroy_model(&self, model_uuid: &Uuid) -> Result<(), DomainError> {
        self.call(
            "ModelManager",
            9,
            None,
            "DestroyModels",
            json!({ "models": [{ "model-tag": format!("model-{}", model_uuid) }] }),
        )
        .await?;
        Ok(())
    }

    /// Controller.InitiateMigration for one model. Returns the migration id.
    pub async fn initiate_migration(
        &self,
        model_uuid: &Uuid,
        target_info: Value,
    ) -> Result<String, DomainError> {
        let response = self
            .call(
                "Controller",
                11,
                None,
                "InitiateMigration",
                json!({ "specs": [{
                    "model-tag": format!("model-{}", model_uuid),
                    "target-info": target_info,
                }] }),
            )
            .await?;
        let result = response
            .get("results")
            .and_then(|r| r.get(0))
            .cloned()
            .ok_or_else(|| DomainError::Internal("empty InitiateMigration result".to_string()))?;
        if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_str);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("migration failed");
            return Err(rpc_error(code, message));
        }
        Ok(result
            .get("migration-id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub async fn clouds(&self) -> Result<HashMap<String, WireCloud>, DomainError> {
        let response = self.call("Cloud", 7, None, "Clouds", json!({})).await?;
        let clouds: HashMap<String, WireCloud> = serde_json::from_value(
            response.get("clouds").cloned().unwrap_or_else(|| json!({})),
        )?;
        Ok(clouds)
    }

    pub async fn update_credential(
        &self,
        credential_tag: &str,
        auth_type: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<(), DomainError> {
        self.call(
            "Cloud",
            7,
            None,
            "UpdateCredentialsCheckModels",
            json!({ "credentials": [{
                "tag": credential_tag,
                "credential": { "auth-type": auth_type, "attrs": attrs },
            }] }),
        )
        .await?;
        Ok(())
    }

    pub async fn full_status(&self) -> Result<Value, DomainError> {
        self.call("Client", 6, None, "FullStatus", json!({})).await
    }

    pub async fn ping(&self) -> Result<(), DomainError> {
        self.call("Pinger", 1, None, "Ping", json!({})).await?;
        Ok(())
    }

    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.tx.send(Message::Close(None));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_mapping() {
        assert!(matches!(
            rpc_error(Some("unauthorized access"), "nope"),
            DomainError::Unauthorized
        ));
        assert!(matches!(
            rpc_error(Some("not found"), "model"),
            DomainError::NotFound(_)
        ));
        assert!(matches!(
            rpc_error(None, "boom"),
            DomainError::Internal(_)
        ));
    }

    #[test]
    fn test_tls_connector_rejects_garbage_ca() {
        let err = match tls_connector(Some("not a pem")) {
            Err(e) => e,
            Ok(_) => panic!("expected tls_connector to reject garbage CA"),
        };
        assert!(matches!(err, DomainError::BadRequest(_)));
    }

    #[test]
    fn test_tls_connector_absent_ca_uses_defaults() {
        assert!(tls_connector(None).unwrap().is_none());
    }
}
