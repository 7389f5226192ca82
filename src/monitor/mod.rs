//! O monitor (all-watcher): um worker com lease por controller que consome o
//! delta stream e reconcilia o índice local.
//!
//! Lease protocol: a candidate loop polls the controller table and attempts
//! a CAS acquisition for any controller whose lease is free or expired. The
//! worker renews at a third of the lease duration; a failed renewal means
//! another candidate took over, and the worker stops cleanly.

pub mod reconciler;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::entities::Controller;
use crate::domain::errors::DomainError;
use crate::domain::repositories::{
    ControllerRepository, CredentialRepository, ModelRepository, OfferRepository,
};
use crate::infra::vault::SecretStore;
use crate::jujuapi::ConnectionPool;
use reconciler::Reconciler;

/// Chosen so that `lease_duration >= 3 * renew_interval`.
pub const LEASE_DURATION_SECS: i64 = 60;

#[derive(Clone)]
pub struct MonitorDeps {
    pub controllers: Arc<dyn ControllerRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub secrets: Arc<dyn SecretStore>,
    pub pool: ConnectionPool,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub lease_duration: ChronoDuration,
    pub poll_interval: Duration,
    pub dial_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            lease_duration: ChronoDuration::seconds(LEASE_DURATION_SECS),
            poll_interval: Duration::from_secs(10),
            dial_backoff: Duration::from_secs(5),
        }
    }
}

/// Build the worker owner id: `<agent-username>-<random suffix>`.
pub fn owner_id(agent_username: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}-{:x}", agent_username, suffix)
}

/// Whether a candidate may try to acquire the lease recorded on `ctl`.
pub fn lease_is_free(ctl: &Controller, own_id: &str, now: DateTime<Utc>) -> bool {
    match (&ctl.monitor_lease_owner, ctl.monitor_lease_expiry) {
        (Some(owner), Some(expiry)) => owner == own_id || expiry <= now,
        _ => true,
    }
}

pub struct Monitor {
    deps: MonitorDeps,
    config: MonitorConfig,
    owner_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Monitor {
    pub fn new(deps: MonitorDeps, config: MonitorConfig, owner_id: String) -> Self {
        Monitor {
            deps,
            config,
            owner_id,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Candidate loop: poll the controller table, acquire free leases, and
    /// supervise one worker task per held lease until shutdown.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut workers: JoinSet<()> = JoinSet::new();
        loop {
            if let Err(e) = self.acquire_round(&mut workers, shutdown.clone()).await {
                warn!(error = %e, "monitor acquisition round failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        // Workers observe the same shutdown signal and release their leases.
        while workers.join_next().await.is_some() {}
        info!("monitor stopped");
    }

    async fn acquire_round(
        &self,
        workers: &mut JoinSet<()>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), DomainError> {
        let now = Utc::now();
        for ctl in self.deps.controllers.list().await? {
            if self.active.lock().contains(&ctl.name) {
                continue;
            }
            if !lease_is_free(&ctl, &self.owner_id, now) {
                continue;
            }
            let new_expiry = now + self.config.lease_duration;
            match self
                .deps
                .controllers
                .acquire_monitor_lease(
                    &ctl.name,
                    ctl.monitor_lease_expiry,
                    ctl.monitor_lease_owner.as_deref(),
                    Some(new_expiry),
                    Some(&self.owner_id),
                )
                .await
            {
                Ok(expiry) => {
                    info!(controller = %ctl.name, owner = %self.owner_id, "acquired monitor lease");
                    self.active.lock().insert(ctl.name.clone());
                    let worker = Worker {
                        deps: self.deps.clone(),
                        config: self.config.clone(),
                        owner_id: self.owner_id.clone(),
                        controller: ctl.name.clone(),
                        lease_expiry: expiry.unwrap_or(new_expiry),
                        active: self.active.clone(),
                    };
                    workers.spawn(worker.run(shutdown.clone()));
                }
                Err(DomainError::LeaseUnavailable(_)) => {
                    // Someone else got there first; back off until next poll.
                    debug!(controller = %ctl.name, "lease unavailable");
                }
                Err(DomainError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

struct Worker {
    deps: MonitorDeps,
    config: MonitorConfig,
    owner_id: String,
    controller: String,
    lease_expiry: DateTime<Utc>,
    active: Arc<Mutex<HashSet<String>>>,
}

enum WorkerExit {
    /// Lease lost or controller gone; nothing to release.
    Lost,
    /// Stop and release the lease.
    Release,
}

impl Worker {
    async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let exit = self.watch_loop(&mut shutdown).await;
        if matches!(exit, WorkerExit::Release) {
            let release = self
                .deps
                .controllers
                .acquire_monitor_lease(
                    &self.controller,
                    Some(self.lease_expiry),
                    Some(&self.owner_id),
                    None,
                    None,
                )
                .await;
            match release {
                Ok(_) => info!(controller = %self.controller, "released monitor lease"),
                Err(e) => warn!(controller = %self.controller, error = %e, "failed to release lease"),
            }
        }
        self.active.lock().remove(&self.controller);
    }

    async fn renew(&mut self) -> Result<(), DomainError> {
        let now = Utc::now();
        let new_expiry = now + self.config.lease_duration;
        self.deps
            .controllers
            .acquire_monitor_lease(
                &self.controller,
                Some(self.lease_expiry),
                Some(&self.owner_id),
                Some(new_expiry),
                Some(&self.owner_id),
            )
            .await?;
        self.lease_expiry = new_expiry;
        Ok(())
    }

    async fn watch_loop(
        &mut self,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> WorkerExit {
        let renew_interval =
            Duration::from_secs((self.config.lease_duration.num_seconds() as u64 / 3).max(1));
        let mut renew = tokio::time::interval(renew_interval);
        renew.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        renew.reset();

        'outer: loop {
            if *shutdown.borrow() {
                return WorkerExit::Release;
            }
            let ctl = match self.deps.controllers.get_by_name(&self.controller).await {
                Ok(Some(ctl)) => ctl,
                Ok(None) => return WorkerExit::Lost,
                Err(e) => {
                    warn!(controller = %self.controller, error = %e, "store unreachable");
                    return WorkerExit::Release;
                }
            };

            let conn = match self.deps.pool.open_api_from_doc(&ctl).await {
                Ok(conn) => {
                    let _ = self.deps.controllers.set_available(&self.controller).await;
                    conn
                }
                Err(e) => {
                    let _ = self
                        .deps
                        .controllers
                        .set_unavailable_at(&self.controller, Utc::now())
                        .await;
                    if !e.is_retriable() {
                        warn!(controller = %self.controller, error = %e, "permanent dial failure");
                        return WorkerExit::Release;
                    }
                    debug!(controller = %self.controller, error = %e, "dial failed; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.dial_backoff) => {}
                        _ = shutdown.changed() => return WorkerExit::Release,
                    }
                    if self.renew().await.is_err() {
                        return WorkerExit::Lost;
                    }
                    continue;
                }
            };

            self.push_pending_credentials(&conn).await;

            let watcher_id = match conn.watch_all_models().await {
                Ok(id) => id,
                Err(e) => {
                    warn!(controller = %self.controller, error = %e, "WatchAllModels failed");
                    let _ = self
                        .deps
                        .controllers
                        .set_unavailable_at(&self.controller, Utc::now())
                        .await;
                    self.deps.pool.evict(conn);
                    tokio::time::sleep(self.config.dial_backoff).await;
                    if self.renew().await.is_err() {
                        return WorkerExit::Lost;
                    }
                    continue;
                }
            };

            // Hold clones locally so the reconciler's borrows do not pin
            // `self` for the lifetime of the stream.
            let controller_name = self.controller.clone();
            let models = self.deps.models.clone();
            let offers = self.deps.offers.clone();
            let controllers = self.deps.controllers.clone();
            let mut reconciler = Reconciler::new(
                &controller_name,
                models.as_ref(),
                offers.as_ref(),
                controllers.as_ref(),
            );

            loop {
                // The batch future borrows the connection; keep it scoped so
                // the connection can be evicted on error below.
                let deltas = {
                    let next = conn.all_watcher_next(&watcher_id);
                    tokio::pin!(next);
                    loop {
                        tokio::select! {
                            res = &mut next => break res,
                            _ = renew.tick() => {
                                if let Err(e) = self.renew().await {
                                    debug!(controller = %self.controller, error = %e, "lease renewal failed; stopping");
                                    let _ = conn.all_watcher_stop(&watcher_id).await;
                                    return WorkerExit::Lost;
                                }
                            }
                            _ = shutdown.changed() => {
                                let _ = conn.all_watcher_stop(&watcher_id).await;
                                return WorkerExit::Release;
                            }
                        }
                    }
                };
                match deltas {
                    Ok(deltas) => {
                        if let Err(e) = reconciler.apply_batch(&deltas, Utc::now()).await {
                            warn!(controller = %self.controller, error = %e, "delta application failed");
                        }
                    }
                    Err(e) => {
                        warn!(controller = %self.controller, error = %e, "all-watcher errored");
                        let _ = self
                            .deps
                            .controllers
                            .set_unavailable_at(&self.controller, Utc::now())
                            .await;
                        self.deps.pool.evict(conn);
                        tokio::time::sleep(self.config.dial_backoff).await;
                        if self.renew().await.is_err() {
                            return WorkerExit::Lost;
                        }
                        continue 'outer;
                    }
                }
            }
        }
    }

    /// Side channel: while a connection is held, push any credentials whose
    /// attributes changed since the controller last saw them.
    async fn push_pending_credentials(&self, conn: &crate::jujuapi::ConnHandle) {
        let pending = match self
            .deps
            .credentials
            .list_pending_for_controller(&self.controller)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(controller = %self.controller, error = %e, "listing pending credentials failed");
                return;
            }
        };
        for credential in pending {
            let attrs = match self
                .deps
                .secrets
                .get_cloud_credential(&credential.cloud, &credential.owner, &credential.name)
                .await
            {
                Ok(Some(attrs)) => attrs,
                Ok(None) => Default::default(),
                Err(e) => {
                    warn!(error = %e, "reading credential attributes failed");
                    continue;
                }
            };
            let tag = format!(
                "cloudcred-{}_{}_{}",
                credential.cloud, credential.owner, credential.name
            );
            if let Err(e) = conn
                .update_credential(&tag, &credential.auth_type, &attrs)
                .await
            {
                warn!(controller = %self.controller, %tag, error = %e, "credential update failed");
                continue;
            }
            let _ = self
                .deps
                .credentials
                .set_pending_update(&credential.cloud, &credential.owner, &credential.name, false)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ControllerStats;
    use uuid::Uuid;

    fn controller(owner: Option<&str>, expiry: Option<DateTime<Utc>>) -> Controller {
        Controller {
            name: "ctl1".into(),
            uuid: Uuid::new_v4(),
            public_address: None,
            ca_cert: None,
            admin_user: "admin".into(),
            host_ports: vec![],
            cloud: "aws".into(),
            region: None,
            agent_version: None,
            deprecated: false,
            unavailable_since: None,
            monitor_lease_owner: owner.map(str::to_string),
            monitor_lease_expiry: expiry,
            stats: ControllerStats::default(),
        }
    }

    #[test]
    fn test_owner_id_shape() {
        let id = owner_id("foo");
        let re = regex::Regex::new("^foo-[a-z0-9]+$").unwrap();
        assert!(re.is_match(&id), "{id}");
    }

    #[test]
    fn test_lease_is_free_for_unleased_controller() {
        let now = Utc::now();
        assert!(lease_is_free(&controller(None, None), "me-1", now));
    }

    #[test]
    fn test_lease_held_by_other_is_not_free_until_expiry() {
        let now = Utc::now();
        let live = controller(Some("other-1"), Some(now + ChronoDuration::seconds(30)));
        assert!(!lease_is_free(&live, "me-1", now));
        let expired = controller(Some("other-1"), Some(now - ChronoDuration::seconds(1)));
        assert!(lease_is_free(&expired, "me-1", now));
    }

    #[test]
    fn test_own_lease_is_always_reacquirable() {
        let now = Utc::now();
        let own = controller(Some("me-1"), Some(now + ChronoDuration::seconds(30)));
        assert!(lease_is_free(&own, "me-1", now));
    }

    #[test]
    fn test_lease_duration_covers_three_renewals() {
        let config = MonitorConfig::default();
        assert!(config.lease_duration.num_seconds() >= 3 * (LEASE_DURATION_SECS / 3));
    }
}
