use std::collections::HashMap;
use std::net::IpAddr;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::entities::{Controller, HostPort};
use crate::domain::errors::DomainError;
use crate::domain::repositories::ControllerRepository;
use crate::infra::vault::SecretStore;
use crate::jujuapi::conn::Connection;
use crate::jujuapi::params::WireHostPort;

/// Principal used for the pool's own (admin-credential) connections.
const ADMIN_PRINCIPAL: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub controller: Uuid,
    pub model: Option<Uuid>,
    pub principal: String,
}

struct CachedConn {
    conn: Arc<Connection>,
    refs: usize,
}

struct PoolInner {
    dial_timeout: Duration,
    conns: Mutex<HashMap<ConnKey, CachedConn>>,
    jwts: Mutex<HashMap<(Uuid, String), (String, DateTime<Utc>)>>,
    secrets: Arc<dyn SecretStore>,
    controllers: Arc<dyn ControllerRepository>,
}

/// Scoped handle to a pooled connection. Dropping the handle decrements the
/// reference count; the underlying connection stays cached for reuse while
/// it remains healthy.
pub struct ConnHandle {
    key: ConnKey,
    conn: Arc<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for ConnHandle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for ConnHandle {
    fn drop(&mut self) {
        let mut conns = self.pool.conns.lock();
        if let Some(cached) = conns.get_mut(&self.key) {
            cached.refs = cached.refs.saturating_sub(1);
            if cached.refs == 0 && !cached.conn.is_alive() {
                conns.remove(&self.key);
            }
        }
    }
}

/// Bounded cache of authenticated connections keyed by
/// `(controller, model, principal)`.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        controllers: Arc<dyn ControllerRepository>,
        dial_timeout: Duration,
    ) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                dial_timeout,
                conns: Mutex::new(HashMap::new()),
                jwts: Mutex::new(HashMap::new()),
                secrets,
                controllers,
            }),
        }
    }

    fn checkout(&self, key: &ConnKey) -> Option<ConnHandle> {
        let mut conns = self.inner.conns.lock();
        match conns.get_mut(key) {
            Some(cached) if cached.conn.is_alive() => {
                cached.refs += 1;
                Some(ConnHandle {
                    key: key.clone(),
                    conn: cached.conn.clone(),
                    pool: self.inner.clone(),
                })
            }
            Some(_) => {
                conns.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: ConnKey, conn: Arc<Connection>) -> ConnHandle {
        let mut conns = self.inner.conns.lock();
        // Lose the race gracefully: reuse whichever connection got cached
        // first and drop ours.
        if let Some(cached) = conns.get_mut(&key) {
            if cached.conn.is_alive() {
                cached.refs += 1;
                conn.close();
                return ConnHandle {
                    key,
                    conn: cached.conn.clone(),
                    pool: self.inner.clone(),
                };
            }
        }
        conns.insert(
            key.clone(),
            CachedConn {
                conn: conn.clone(),
                refs: 1,
            },
        );
        ConnHandle {
            key,
            conn,
            pool: self.inner.clone(),
        }
    }

    pub async fn open_api(&self, controller_name: &str) -> Result<ConnHandle, DomainError> {
        let controller = self
            .inner
            .controllers
            .get_by_name(controller_name)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("controller {}", controller_name)))?;
        self.open_api_from_doc(&controller).await
    }

    pub async fn open_api_from_doc(
        &self,
        controller: &Controller,
    ) -> Result<ConnHandle, DomainError> {
        self.open(controller, None).await
    }

    pub async fn open_model_api(
        &self,
        controller: &Controller,
        model_uuid: &Uuid,
    ) -> Result<ConnHandle, DomainError> {
        self.open(controller, Some(*model_uuid)).await
    }

    async fn open(
        &self,
        controller: &Controller,
        model_uuid: Option<Uuid>,
    ) -> Result<ConnHandle, DomainError> {
        let key = ConnKey {
            controller: controller.uuid,
            model: model_uuid,
            principal: ADMIN_PRINCIPAL.to_string(),
        };
        if let Some(handle) = self.checkout(&key) {
            return Ok(handle);
        }

        let (username, password) = self
            .inner
            .secrets
            .get_controller_credentials(&controller.name)
            .await?
            .ok_or_else(|| {
                DomainError::Internal(format!(
                    "no stored credentials for controller {}",
                    controller.name
                ))
            })?;

        let addresses = controller.dial_addresses();
        if addresses.is_empty() {
            return Err(DomainError::ApiConnection(format!(
                "controller {} has no usable addresses",
                controller.name
            )));
        }
        let mut last_err =
            DomainError::ApiConnection(format!("controller {} unreachable", controller.name));
        for addr in addresses {
            let conn = match Connection::dial(
                &addr,
                model_uuid.as_ref(),
                controller.ca_cert.as_deref(),
                self.inner.dial_timeout,
            )
            .await
            {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(controller = %controller.name, addr, error = %e, "dial failed");
                    last_err = e;
                    continue;
                }
            };

            let auth_tag = format!("user-{}", username);
            let login = conn
                .login(Some(&auth_tag), Some(&password), None)
                .await?;
            if model_uuid.is_none() {
                let expected = format!("controller-{}", controller.uuid);
                match login.controller_tag.as_deref() {
                    Some(tag) if tag == expected => {}
                    Some(tag) => {
                        return Err(DomainError::Internal(format!(
                            "controller {} reported UUID {}, expected {}",
                            controller.name, tag, expected
                        )));
                    }
                    None => {}
                }
                self.write_back(controller, &login).await;
            }
            return Ok(self.insert(key, Arc::new(conn)));
        }
        Err(last_err)
    }

    /// Persist the freshest API addresses and agent version after a dial.
    async fn write_back(
        &self,
        controller: &Controller,
        login: &crate::jujuapi::params::LoginResult,
    ) {
        let host_ports = filter_usable_host_ports(&login.servers);
        if !host_ports.is_empty() {
            if let Err(e) = self
                .inner
                .controllers
                .update_host_ports(&controller.name, &host_ports)
                .await
            {
                warn!(controller = %controller.name, error = %e, "failed to record host ports");
            }
        }
        if let Some(version) = &login.server_version {
            if let Err(e) = self
                .inner
                .controllers
                .set_agent_version(&controller.name, version)
                .await
            {
                warn!(controller = %controller.name, error = %e, "failed to record agent version");
            }
        }
    }

    /// Forcibly close a connection and drop it from the cache. Used by the
    /// monitor when the all-watcher errors.
    pub fn evict(&self, handle: ConnHandle) {
        let mut conns = self.inner.conns.lock();
        conns.remove(&handle.key);
        handle.conn.close();
    }

    pub fn cached_jwt(&self, controller: &Uuid, principal: &str, now: DateTime<Utc>) -> Option<String> {
        let jwts = self.inner.jwts.lock();
        jwts.get(&(*controller, principal.to_string()))
            .filter(|(_, expiry)| *expiry > now)
            .map(|(token, _)| token.clone())
    }

    pub fn store_jwt(
        &self,
        controller: &Uuid,
        principal: &str,
        token: String,
        expiry: DateTime<Utc>,
    ) {
        self.inner
            .jwts
            .lock()
            .insert((*controller, principal.to_string()), (token, expiry));
    }

    pub fn close_all(&self) {
        let mut conns = self.inner.conns.lock();
        for (_, cached) in conns.drain() {
            cached.conn.close();
        }
    }
}

/// Keep only addresses a client outside the controller's network can use.
/// DNS-named hosts of unknown scope are taken to be public.
pub fn filter_usable_host_ports(servers: &[Vec<WireHostPort>]) -> Vec<Vec<HostPort>> {
    let mut out = Vec::new();
    for group in servers {
        let mut usable = Vec::new();
        for hp in group {
            match hp.scope.as_str() {
                "link-local" | "machine-local" => continue,
                "public" | "local-cloud" => usable.push(HostPort {
                    host: hp.value.clone(),
                    port: hp.port,
                    scope: hp.scope.clone(),
                }),
                _ => {
                    let scope = if hp.value.parse::<IpAddr>().is_err() {
                        "public".to_string()
                    } else {
                        hp.scope.clone()
                    };
                    usable.push(HostPort {
                        host: hp.value.clone(),
                        port: hp.port,
                        scope,
                    });
                }
            }
        }
        if !usable.is_empty() {
            out.push(usable);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hp(value: &str, scope: &str) -> WireHostPort {
        WireHostPort {
            value: value.to_string(),
            port: 17070,
            scope: scope.to_string(),
        }
    }

    #[test]
    fn test_filter_drops_local_scopes() {
        let servers = vec![vec![
            hp("127.0.0.1", "machine-local"),
            hp("169.254.1.1", "link-local"),
            hp("10.1.2.3", "local-cloud"),
            hp("1.2.3.4", "public"),
        ]];
        let out = filter_usable_host_ports(&servers);
        assert_eq!(out.len(), 1);
        let hosts: Vec<&str> = out[0].iter().map(|hp| hp.host.as_str()).collect();
        assert_eq!(hosts, vec!["10.1.2.3", "1.2.3.4"]);
    }

    #[test]
    fn test_dns_hosts_of_unknown_scope_marked_public() {
        let servers = vec![vec![hp("juju.example.com", ""), hp("192.168.0.1", "")]];
        let out = filter_usable_host_ports(&servers);
        assert_eq!(out[0][0].scope, "public");
        assert_eq!(out[0][1].scope, "");
    }

    #[test]
    fn test_empty_groups_removed() {
        let servers = vec![vec![hp("127.0.0.1", "machine-local")]];
        assert!(filter_usable_host_ports(&servers).is_empty());
    }
}
