use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::*;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::Life;

// Identity Repository
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Create on first sighting; return the stored identity either way.
    async fn upsert(&self, name: &str, now: DateTime<Utc>) -> Result<Identity, DomainError>;
    async fn get(&self, name: &str) -> Result<Option<Identity>, DomainError>;
    async fn set_last_login(&self, name: &str, at: DateTime<Utc>) -> Result<(), DomainError>;
    async fn list(&self) -> Result<Vec<Identity>, DomainError>;
}

// Group Repository
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn add(&self, name: &str) -> Result<Group, DomainError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Group>, DomainError>;
    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Group>, DomainError>;
    /// Renames preserve the UUID and therefore every tuple referencing it.
    async fn rename(&self, name: &str, new_name: &str) -> Result<Group, DomainError>;
    async fn remove(&self, name: &str) -> Result<Group, DomainError>;
    async fn list(&self) -> Result<Vec<Group>, DomainError>;
}

// Cloud Repository
#[async_trait]
pub trait CloudRepository: Send + Sync {
    async fn upsert(&self, cloud: &Cloud) -> Result<(), DomainError>;
    async fn get(&self, name: &str) -> Result<Option<Cloud>, DomainError>;
    async fn list(&self) -> Result<Vec<Cloud>, DomainError>;
    /// Record that a controller hosts a cloud region.
    async fn set_region_controller(
        &self,
        cloud: &str,
        region: &str,
        controller: &str,
    ) -> Result<(), DomainError>;
    /// Controllers hosting the cloud, optionally narrowed to one region.
    async fn controllers_for(
        &self,
        cloud: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>, DomainError>;
    async fn remove_region_controllers(&self, controller: &str) -> Result<(), DomainError>;
}

// Cloud Credential Repository
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn upsert(&self, credential: &CloudCredential) -> Result<(), DomainError>;
    async fn get(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
    ) -> Result<Option<CloudCredential>, DomainError>;
    async fn delete(&self, cloud: &str, owner: &str, name: &str) -> Result<(), DomainError>;
    async fn list_for_owner(&self, owner: &str) -> Result<Vec<CloudCredential>, DomainError>;
    /// Flag a credential so the monitor pushes it to controllers that host
    /// models using it.
    async fn set_pending_update(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
        pending: bool,
    ) -> Result<(), DomainError>;
    async fn list_pending_for_controller(
        &self,
        controller: &str,
    ) -> Result<Vec<CloudCredential>, DomainError>;
}

// Controller Repository
#[async_trait]
pub trait ControllerRepository: Send + Sync {
    async fn add(&self, controller: &Controller) -> Result<(), DomainError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Controller>, DomainError>;
    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Controller>, DomainError>;
    async fn list(&self) -> Result<Vec<Controller>, DomainError>;
    async fn remove(&self, name: &str) -> Result<(), DomainError>;
    async fn set_deprecated(&self, name: &str, deprecated: bool) -> Result<(), DomainError>;
    async fn set_available(&self, name: &str) -> Result<(), DomainError>;
    /// Leaves an earlier timestamp unchanged so the outage start is kept.
    async fn set_unavailable_at(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<(), DomainError>;
    async fn set_stats(&self, name: &str, stats: &ControllerStats) -> Result<(), DomainError>;
    async fn set_agent_version(&self, name: &str, version: &str) -> Result<(), DomainError>;
    async fn update_host_ports(
        &self,
        name: &str,
        host_ports: &[Vec<HostPort>],
    ) -> Result<(), DomainError>;

    /// Compare-and-set on `(monitor_lease_expiry, monitor_lease_owner)`.
    ///
    /// Succeeds only when the stored pair equals `(old_expiry, old_owner)`.
    /// A `None` new owner releases the lease. Returns the new expiry, or
    /// `NotFound` for a missing controller and `LeaseUnavailable` when the
    /// stored pair no longer matches.
    async fn acquire_monitor_lease(
        &self,
        name: &str,
        old_expiry: Option<DateTime<Utc>>,
        old_owner: Option<&str>,
        new_expiry: Option<DateTime<Utc>>,
        new_owner: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, DomainError>;
}

// Model Repository
#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn add(&self, model: &Model) -> Result<(), DomainError>;
    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Model>, DomainError>;
    async fn get_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Model>, DomainError>;
    async fn list(&self) -> Result<Vec<Model>, DomainError>;
    async fn list_for_controller(&self, controller: &str) -> Result<Vec<Model>, DomainError>;
    async fn remove(&self, uuid: &Uuid) -> Result<(), DomainError>;
    async fn remove_for_controller(&self, controller: &str) -> Result<(), DomainError>;
    async fn set_life(
        &self,
        controller: &str,
        uuid: &Uuid,
        life: Life,
    ) -> Result<(), DomainError>;
    async fn update_counts(
        &self,
        uuid: &Uuid,
        counts: &ModelCounts,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError>;
    async fn set_status(&self, uuid: &Uuid, status: Option<&str>) -> Result<(), DomainError>;
    /// Swap the controller reference after a migration.
    async fn set_controller(&self, uuid: &Uuid, controller: &str) -> Result<(), DomainError>;
    async fn set_migration_target(
        &self,
        uuid: &Uuid,
        target: Option<&str>,
    ) -> Result<(), DomainError>;
    async fn update_machine(&self, machine: &MachineInfo) -> Result<(), DomainError>;
    async fn remove_machine(&self, model_uuid: &Uuid, machine_id: &str)
        -> Result<(), DomainError>;
    async fn machines_for_model(&self, model_uuid: &Uuid) -> Result<Vec<MachineInfo>, DomainError>;
}

// Application Offer Repository
#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn upsert(&self, offer: &ApplicationOffer) -> Result<(), DomainError>;
    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<ApplicationOffer>, DomainError>;
    async fn get_by_url(&self, url: &str) -> Result<Option<ApplicationOffer>, DomainError>;
    async fn list_for_model(&self, model_uuid: &Uuid)
        -> Result<Vec<ApplicationOffer>, DomainError>;
    async fn remove(&self, uuid: &Uuid) -> Result<(), DomainError>;
    async fn remove_for_model(&self, model_uuid: &Uuid) -> Result<(), DomainError>;
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub user_tag: Option<String>,
    pub method: Option<String>,
    pub model: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub const AUDIT_LOG_DEFAULT_LIMIT: i64 = 50;
pub const AUDIT_LOG_MAX_LIMIT: i64 = 1000;

impl AuditLogFilter {
    /// Effective limit, clamped to `[1, 1000]` with a default of 50.
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(AUDIT_LOG_DEFAULT_LIMIT)
            .clamp(1, AUDIT_LOG_MAX_LIMIT)
    }
}

// Audit Log Repository
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError>;
    async fn find(&self, filter: &AuditLogFilter) -> Result<Vec<AuditLogEntry>, DomainError>;
    async fn purge(&self, before: DateTime<Utc>) -> Result<u64, DomainError>;
}

// Browser Session Repository
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn put(&self, session: &Session) -> Result<(), DomainError>;
    async fn get(&self, id: &str) -> Result<Option<Session>, DomainError>;
    async fn delete(&self, id: &str) -> Result<(), DomainError>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DomainError>;
}

// Self-administered ACL Repository
#[async_trait]
pub trait AclRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Vec<String>>, DomainError>;
    /// Stores the users sorted and de-duplicated.
    async fn set(&self, name: &str, users: &[String]) -> Result<(), DomainError>;
    async fn add(&self, name: &str, users: &[String]) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_limit_clamping() {
        let mut f = AuditLogFilter::default();
        assert_eq!(f.effective_limit(), 50);
        f.limit = Some(0);
        assert_eq!(f.effective_limit(), 1);
        f.limit = Some(-5);
        assert_eq!(f.effective_limit(), 1);
        f.limit = Some(5000);
        assert_eq!(f.effective_limit(), 1000);
        f.limit = Some(200);
        assert_eq!(f.effective_limit(), 200);
    }
}
